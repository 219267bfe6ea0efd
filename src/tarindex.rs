// SPDX-License-Identifier: MIT OR Apache-2.0

//! The package index: a POSIX ustar archive of per-package `.cabal` and preferred-versions
//! files, plus a side-car offset table that makes single-file lookups O(1) instead of a linear
//! tar scan, and the incremental byte-range update math from the HTTP adapter.

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The number of trailing bytes of a cached tar file that must be overwritten, not preserved,
/// when appending an incremental update: a tar stream ends in a two-block (1024 byte) zero
/// trailer that has to be replaced by new archive data rather than kept in front of it.
pub const TAR_TRAILER_BYTES: u64 = 1024;

/// One entry in the side-car offset table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexLocation {
    /// Byte offset of the entry's header within the tar file.
    pub offset: u64,
    /// Length of the entry's file content, in bytes.
    pub length: u64,
}

/// The side-car offset table: `(pkgName, pkgVersion, filename) → (offset, length)`, serialized
/// as a flat JSON map keyed by `"pkgName/pkgVersion/filename"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexSidecar {
    entries: HashMap<String, IndexLocation>,
}

impl IndexSidecar {
    /// Builds a side-car table by scanning every entry in `tar_path`.
    pub fn build_from_tar(tar_path: &Path) -> Result<Self> {
        let file = File::open(tar_path).context(error::TarReadSnafu { path: tar_path })?;
        let mut archive = tar::Archive::new(file);
        let mut entries = HashMap::new();
        for entry in archive
            .entries()
            .context(error::TarReadSnafu { path: tar_path })?
        {
            let entry = entry.context(error::TarReadSnafu { path: tar_path })?;
            let offset = entry.raw_file_position();
            let length = entry.header().size().context(error::TarReadSnafu { path: tar_path })?;
            let path = entry
                .path()
                .context(error::TarReadSnafu { path: tar_path })?
                .to_string_lossy()
                .into_owned();
            if path.ends_with('/') {
                continue;
            }
            let parts: Vec<&str> = path.splitn(3, '/').collect();
            if parts.len() != 3 {
                return error::MalformedIndexEntrySnafu { path }.fail();
            }
            entries.insert(path, IndexLocation { offset, length });
        }
        Ok(Self { entries })
    }

    /// Loads a previously persisted side-car table.
    pub fn load(sidecar_path: &Path) -> Result<Self> {
        let bytes = std::fs::read(sidecar_path).context(error::FileReadSnafu {
            path: sidecar_path.to_path_buf(),
        })?;
        serde_json::from_slice(&bytes).context(error::ParseIndexSnafu {
            path: sidecar_path.to_path_buf(),
        })
    }

    /// Persists this table to `sidecar_path`.
    pub fn save(&self, sidecar_path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self).context(error::DatastoreSerializeSnafu {
            what: "index side-car".to_owned(),
            path: sidecar_path.to_path_buf(),
        })?;
        std::fs::write(sidecar_path, bytes).context(error::FileWriteSnafu {
            path: sidecar_path.to_path_buf(),
        })
    }

    /// Looks up `pkg_name/pkg_version/filename` and reads its bytes out of `tar_path`.
    pub fn get(&self, tar_path: &Path, pkg_name: &str, pkg_version: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        let key = format!("{pkg_name}/{pkg_version}/{filename}");
        let Some(location) = self.entries.get(&key) else {
            return Ok(None);
        };
        let mut file = File::open(tar_path).context(error::TarReadSnafu { path: tar_path })?;
        // The offset table points at the entry header; the content starts one 512-byte block
        // later. `tar::Entry::raw_file_position` already returns the content offset.
        file.seek(SeekFrom::Start(location.offset))
            .context(error::TarReadSnafu { path: tar_path })?;
        let mut buf = vec![0u8; location.length as usize];
        file.read_exact(&mut buf)
            .context(error::TarReadSnafu { path: tar_path })?;
        Ok(Some(buf))
    }
}

/// Computes the `[lo, hi)` byte range to request for an incremental index update, given the
/// currently cached length and the newly declared length. `hi` is exclusive, matching the
/// spec's `get_range(uri, [lo, hi))` contract; callers building the `Range` header send
/// `bytes={lo}-{hi-1}`.
///
/// Returns `None` if no incremental update is possible (the server hasn't grown the file, or the
/// cached copy is smaller than the trailer itself).
pub fn incremental_range(cached_len: u64, declared_len: u64) -> Option<(u64, u64)> {
    if declared_len <= cached_len || cached_len < TAR_TRAILER_BYTES {
        return None;
    }
    Some((cached_len - TAR_TRAILER_BYTES, declared_len))
}

/// Applies an incremental update: truncates `cached_path` to drop its trailer, appends `suffix`
/// (the bytes fetched for `[lo, hi)`), and writes the result to `out_path`. Does not verify the
/// result against a `FileInfo`; callers must do that before committing `out_path` to the cache.
pub fn apply_incremental_update(cached_path: &Path, lo: u64, suffix: &[u8], out_path: &Path) -> Result<()> {
    let mut cached = File::open(cached_path).context(error::TarReadSnafu { path: cached_path })?;
    let mut prefix = vec![0u8; lo as usize];
    cached
        .read_exact(&mut prefix)
        .context(error::TarReadSnafu { path: cached_path })?;
    let mut out = File::create(out_path).context(error::FileWriteSnafu {
        path: out_path.to_path_buf(),
    })?;
    out.write_all(&prefix)
        .context(error::FileWriteSnafu { path: out_path.to_path_buf() })?;
    out.write_all(suffix)
        .context(error::FileWriteSnafu { path: out_path.to_path_buf() })?;
    out.sync_all()
        .context(error::FileWriteSnafu { path: out_path.to_path_buf() })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_range_matches_spec_scenario() {
        // cached index length 10240, server declares 12288.
        let range = incremental_range(10240, 12288).unwrap();
        assert_eq!(range, (9216, 12288));
    }

    #[test]
    fn incremental_range_none_when_not_grown() {
        assert!(incremental_range(10240, 10240).is_none());
        assert!(incremental_range(10240, 9000).is_none());
    }

    #[test]
    fn incremental_range_none_when_cache_smaller_than_trailer() {
        assert!(incremental_range(500, 2000).is_none());
    }

    fn write_tar(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("00-index.tar");
        let file = File::create(&path).unwrap();
        let mut builder = tar::Builder::new(file);
        let data = b"name: foo\nversion: 1.0.0\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder
            .append_data(&mut header, "foo/1.0.0/foo.cabal", &data[..])
            .unwrap();
        builder.finish().unwrap();
        path
    }

    #[test]
    fn build_and_lookup_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tar_path = write_tar(dir.path());
        let sidecar = IndexSidecar::build_from_tar(&tar_path).unwrap();
        let bytes = sidecar
            .get(&tar_path, "foo", "1.0.0", "foo.cabal")
            .unwrap()
            .unwrap();
        assert_eq!(bytes, b"name: foo\nversion: 1.0.0\n");
        assert!(sidecar.get(&tar_path, "foo", "9.9.9", "foo.cabal").unwrap().is_none());
    }
}
