// SPDX-License-Identifier: MIT OR Apache-2.0

//! The repository abstraction: a uniform API over a local cache and an HTTP-backed mirror set,
//! including mirror selection with failover and the incremental index update path.

use crate::cache::{LocalCache, INDEX_FILE_NAME};
use crate::error::{self, Result};
use crate::fetch::fetch_max_size;
use crate::http::{HttpClient, Limits, RangeResult};
use crate::io::SizeBound;
use crate::schema::{FileInfo, MirrorDescriptor};
use crate::tarindex::{self, IndexSidecar};
use crate::transport::{FilesystemTransport, Transport};
use chrono::{DateTime, Utc};
use log::{info, warn};
use snafu::{ensure, ResultExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use url::Url;

/// The archive format(s) a remote file may be requested or served in. Mirrors the phantom-typed
/// `RemoteFile`/`SelectedFormat` design from the source: a sum type over the three shapes the
/// server can offer, handled exhaustively rather than via a boolean pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formats {
    /// Only the uncompressed form is available.
    Un,
    /// Only the gzip-compressed form is available.
    Gz,
    /// Both forms are available; the caller may pick.
    UnGz,
}

impl Formats {
    /// `true` if the uncompressed form is one of the offered formats.
    pub fn offers_uncompressed(self) -> bool {
        matches!(self, Formats::Un | Formats::UnGz)
    }

    /// `true` if the gzip form is one of the offered formats.
    pub fn offers_gzip(self) -> bool {
        matches!(self, Formats::Gz | Formats::UnGz)
    }
}

/// The specific format a caller selected from a [`Formats`] offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedFormat {
    /// The uncompressed form.
    Uncompressed,
    /// The gzip-compressed form.
    Gzip,
}

/// A tagged union describing which remote file is being requested, carrying whatever sizing
/// information the caller has already verified (a pinned `FileInfo`, or nothing for the
/// unauthenticated first fetch of timestamp/root).
#[derive(Debug, Clone)]
pub enum RemoteFile {
    /// `timestamp.json`; unsized, since nothing pins its size until it's been fetched once.
    Timestamp,
    /// `root.json`, with an optional size estimate for the download budget.
    Root {
        /// A caller-supplied upper bound, if known.
        size: Option<u64>,
    },
    /// `snapshot.json`, pinned by the trusted timestamp.
    Snapshot {
        /// The pinned length.
        len: u64,
    },
    /// `mirrors.json`, pinned by the trusted snapshot.
    Mirrors {
        /// The pinned length.
        len: u64,
    },
    /// The package index, pinned by the trusted snapshot, in whichever formats it offers.
    Index {
        /// The formats the server offers for this file.
        formats: Formats,
        /// The pinned length for each offered format, uncompressed first.
        lens: Vec<u64>,
    },
    /// A single package tarball.
    PkgTarGz {
        /// `name-version`, used to build the request path.
        pkg_id: String,
        /// The pinned length.
        len: u64,
    },
}

/// A uniform API over local and HTTP-backed repository state.
pub trait Repository: std::fmt::Debug {
    /// Ensures `remote_file` is available locally (fetching it if necessary) and invokes `cb`
    /// with the format that was selected and the path to the (unverified) downloaded bytes. The
    /// caller is responsible for verifying those bytes before any cache commit.
    fn with_remote(
        &self,
        remote_file: RemoteFile,
        cb: &mut dyn FnMut(SelectedFormat, &Path) -> Result<()>,
    ) -> Result<()>;

    /// Read-only access to verified local state.
    fn get_cached(&self, file: &str) -> Option<PathBuf>;

    /// As above, but specific to the root of trust, whose absence is fatal.
    fn get_cached_root(&self) -> Result<PathBuf>;

    /// Forgets the cached timestamp and snapshot (used after a role-key-changing root rotation).
    fn clear_cache(&self) -> Result<()>;

    /// Looks up a file resident in the package index.
    fn get_from_index(&self, pkg_name: &str, pkg_version: &str, filename: &str) -> Result<Option<Vec<u8>>>;

    /// Selects a mirror for the duration of `scope`; nested `with_remote` calls made from inside
    /// `scope` use that mirror.
    fn with_mirror(&self, scope: &mut dyn FnMut() -> Result<()>) -> Result<()>;

    /// A structured event sink.
    fn log(&self, msg: &str);

    /// Verified handoff: atomically replaces the cached file named `cache_as` with the bytes at
    /// `temp_path`. Callers must have already checked `temp_path`'s contents against a trusted
    /// `FileInfo` (or a full envelope verification, for root) before calling this.
    fn commit(&self, temp_path: &Path, cache_as: &str) -> Result<PathBuf>;

    /// Drops a single cached file, such as a stale index side-car after the index itself has
    /// been replaced.
    fn forget(&self, name: &str) -> Result<()>;

    /// Validates `now` against this repository's persisted monotonic clock, guarding against a
    /// rolled-back system clock (a freeze attack) across process restarts. Returns `now` back on
    /// success, so callers can chain it straight into expiry checks.
    fn system_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>>;
}

/// The cache-relative file name fetched for `remote_file`.
fn relative_path(remote_file: &RemoteFile) -> String {
    match remote_file {
        RemoteFile::Timestamp => "timestamp.json".to_owned(),
        RemoteFile::Root { .. } => "root.json".to_owned(),
        RemoteFile::Snapshot { .. } => "snapshot.json".to_owned(),
        RemoteFile::Mirrors { .. } => "mirrors.json".to_owned(),
        RemoteFile::Index { .. } => INDEX_FILE_NAME.to_owned(),
        RemoteFile::PkgTarGz { pkg_id, .. } => format!("package/{pkg_id}.tar.gz"),
    }
}

/// Joins `relative` onto `base`.
fn join(base: &Url, relative: &str) -> Result<Url> {
    base.join(relative).context(error::JoinUrlSnafu {
        path: relative.to_owned(),
        url: base.clone(),
    })
}

/// The download budget for `remote_file`: an exact bound wherever a parent role already pins a
/// length, and `limits`'s caller-configured cap for the two files nothing pins ahead of time.
fn bound_for(remote_file: &RemoteFile, limits: &Limits) -> SizeBound {
    match remote_file {
        RemoteFile::Timestamp => SizeBound::Upper(limits.max_timestamp_size),
        RemoteFile::Root { size: Some(size) } => SizeBound::Upper(*size),
        RemoteFile::Root { size: None } => SizeBound::Upper(limits.max_root_size),
        RemoteFile::Snapshot { len } | RemoteFile::Mirrors { len } => SizeBound::Exact(*len),
        RemoteFile::Index { lens, .. } => SizeBound::Exact(lens.first().copied().unwrap_or(0)),
        RemoteFile::PkgTarGz { len, .. } => SizeBound::Exact(*len),
    }
}

/// Looks up `pkg_name/pkg_version/filename` in the index cached at `cache`, building (and
/// persisting) the offset side-car on first use. Shared by every [`Repository`] implementation
/// backed by a [`LocalCache`].
fn get_from_index_via(
    cache: &LocalCache,
    pkg_name: &str,
    pkg_version: &str,
    filename: &str,
) -> Result<Option<Vec<u8>>> {
    let Some(tar_path) = cache.get_cached(INDEX_FILE_NAME) else {
        return Ok(None);
    };
    let sidecar_path = cache.path(&format!("{INDEX_FILE_NAME}.idx"));
    let sidecar = if sidecar_path.is_file() {
        IndexSidecar::load(&sidecar_path)?
    } else {
        let built = IndexSidecar::build_from_tar(&tar_path)?;
        built.save(&sidecar_path)?;
        built
    };
    sidecar.get(&tar_path, pkg_name, pkg_version, filename)
}

/// An HTTP-backed [`Repository`]: mirror failover, incremental index updates, and a local cache.
#[derive(Debug)]
pub struct HttpRepository<C: HttpClient> {
    cache: LocalCache,
    client: C,
    out_of_band_mirrors: Vec<Url>,
    learned_mirrors: Mutex<Vec<Url>>,
    selected_mirror: Mutex<Option<Url>>,
    limits: Limits,
}

impl<C: HttpClient> HttpRepository<C> {
    /// Builds a repository rooted at `cache` talking to mirrors in `out_of_band_mirrors` (in
    /// preference order) via `client`, using the default [`Limits`] for the unpinned root and
    /// timestamp downloads.
    pub fn new(cache: LocalCache, client: C, out_of_band_mirrors: Vec<Url>) -> Self {
        Self::with_limits(cache, client, out_of_band_mirrors, Limits::default())
    }

    /// As [`HttpRepository::new`], with caller-supplied [`Limits`].
    pub fn with_limits(cache: LocalCache, client: C, out_of_band_mirrors: Vec<Url>, limits: Limits) -> Self {
        Self {
            cache,
            client,
            out_of_band_mirrors,
            learned_mirrors: Mutex::new(Vec::new()),
            selected_mirror: Mutex::new(None),
            limits,
        }
    }

    /// Replaces the mirrors learned from a verified `mirrors.json`, which are consulted after the
    /// out-of-band list.
    pub fn set_learned_mirrors(&self, mirrors: &[MirrorDescriptor]) {
        let mut guard = self.learned_mirrors.lock().expect("learned mirrors lock poisoned");
        *guard = mirrors.iter().map(|m| m.url_base.clone()).collect();
    }

    fn mirror_candidates(&self) -> Vec<Url> {
        let mut candidates = self.out_of_band_mirrors.clone();
        candidates.extend(self.learned_mirrors.lock().expect("learned mirrors lock poisoned").clone());
        candidates
    }

    fn try_one_mirror(
        &self,
        mirror: &Url,
        remote_file: &RemoteFile,
        cb: &mut dyn FnMut(SelectedFormat, &Path) -> Result<()>,
    ) -> Result<()> {
        let relative = relative_path(remote_file);
        let url = join(mirror, &relative)?;

        if let RemoteFile::Index { .. } = remote_file {
            if let Some(cached) = self.cache.get_cached(INDEX_FILE_NAME) {
                if let Some(result) = self.try_incremental_index_update(&url, &cached, remote_file)? {
                    return cb(SelectedFormat::Uncompressed, &result);
                }
            }
        }

        let bytes = self.client.get(&url, &relative, bound_for(remote_file, &self.limits))?;
        let (temp_path, mut file) = self.cache.unverified_scratch(&relative)?;
        std::io::Write::write_all(&mut file, &bytes).context(error::FileWriteSnafu { path: temp_path.clone() })?;
        drop(file);
        let format = if relative.ends_with(".gz") {
            SelectedFormat::Gzip
        } else {
            SelectedFormat::Uncompressed
        };
        cb(format, &temp_path)
    }

    /// Attempts the incremental byte-range update path for the index. Returns `Ok(None)` (not an
    /// error) whenever the fast path simply isn't available, so the caller falls back to a full
    /// download; this matches the spec's framing of `UpdateImpossible` as always recoverable.
    fn try_incremental_index_update(
        &self,
        url: &Url,
        cached_path: &Path,
        remote_file: &RemoteFile,
    ) -> Result<Option<PathBuf>> {
        let RemoteFile::Index { formats, lens } = remote_file else {
            return Ok(None);
        };
        if !formats.offers_uncompressed() {
            return Ok(None);
        }
        if !self.client.capabilities().accepts_byte_ranges() {
            return Ok(None);
        }
        let declared_len = *lens.first().unwrap_or(&0);
        let cached_len = std::fs::metadata(cached_path)
            .context(error::FileReadSnafu {
                path: cached_path.to_path_buf(),
            })?
            .len();
        let Some((lo, hi)) = tarindex::incremental_range(cached_len, declared_len) else {
            return Ok(None);
        };

        let range_bound = SizeBound::Exact(hi.saturating_sub(lo));
        let (bytes, range_result) = self.client.get_range(url, INDEX_FILE_NAME, range_bound, lo, hi)?;
        if range_result != RangeResult::Partial {
            self.log("server ignored range request; falling back to full download");
            return Ok(None);
        }
        let (temp_path, _file) = self.cache.unverified_scratch(INDEX_FILE_NAME)?;
        if let Err(e) = tarindex::apply_incremental_update(cached_path, lo, &bytes, &temp_path) {
            warn!("incremental index update failed, falling back to full download: {e}");
            return Ok(None);
        }
        Ok(Some(temp_path))
    }
}

impl<C: HttpClient> Repository for HttpRepository<C> {
    fn with_remote(
        &self,
        remote_file: RemoteFile,
        cb: &mut dyn FnMut(SelectedFormat, &Path) -> Result<()>,
    ) -> Result<()> {
        let selected = self
            .selected_mirror
            .lock()
            .expect("mirror lock poisoned")
            .clone();
        let mirrors: Vec<Url> = match selected {
            Some(mirror) => vec![mirror],
            None => return error::NoMirrorSelectedSnafu.fail(),
        };

        let mut last_err = None;
        for mirror in &mirrors {
            match self.try_one_mirror(mirror, &remote_file, cb) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.log(&format!("mirror '{mirror}' failed: {e}"));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(error::Error::NoMirrorSelected))
    }

    fn get_cached(&self, file: &str) -> Option<PathBuf> {
        self.cache.get_cached(file)
    }

    fn get_cached_root(&self) -> Result<PathBuf> {
        self.cache.get_cached_root()
    }

    fn clear_cache(&self) -> Result<()> {
        self.cache.clear_cache()
    }

    fn get_from_index(&self, pkg_name: &str, pkg_version: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        get_from_index_via(&self.cache, pkg_name, pkg_version, filename)
    }

    fn with_mirror(&self, scope: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let candidates = self.mirror_candidates();
        ensure!(!candidates.is_empty(), error::NoMirrorSelectedSnafu);

        let mut last_err = None;
        for mirror in candidates {
            {
                let mut guard = self.selected_mirror.lock().expect("mirror lock poisoned");
                *guard = Some(mirror.clone());
            }
            let result = scope();
            {
                let mut guard = self.selected_mirror.lock().expect("mirror lock poisoned");
                *guard = None;
            }
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.log(&format!("mirror '{mirror}' failed: {e}"));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(error::Error::NoMirrorSelected))
    }

    fn log(&self, msg: &str) {
        info!("{msg}");
    }

    fn commit(&self, temp_path: &Path, cache_as: &str) -> Result<PathBuf> {
        self.cache.commit(temp_path, cache_as)
    }

    fn forget(&self, name: &str) -> Result<()> {
        self.cache.forget(name)
    }

    fn system_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.cache.system_time(now)
    }
}

/// A filesystem-backed [`Repository`]: mirrors are local directories (exposed as `file://` base
/// URLs) serving the same files an HTTP repository would, for air-gapped installs and for
/// exercising the client driver without a network stack.
#[derive(Debug)]
pub struct FilesystemRepository<T: Transport = FilesystemTransport> {
    cache: LocalCache,
    transport: T,
    mirrors: Vec<Url>,
    selected_mirror: Mutex<Option<Url>>,
}

impl<T: Transport> FilesystemRepository<T> {
    /// Builds a repository rooted at `cache`, serving `mirrors` (each a `file://` base URL) via
    /// `transport`.
    pub fn new(cache: LocalCache, transport: T, mirrors: Vec<Url>) -> Self {
        Self {
            cache,
            transport,
            mirrors,
            selected_mirror: Mutex::new(None),
        }
    }
}

impl<T: Transport> Repository for FilesystemRepository<T> {
    fn with_remote(
        &self,
        remote_file: RemoteFile,
        cb: &mut dyn FnMut(SelectedFormat, &Path) -> Result<()>,
    ) -> Result<()> {
        let selected = self.selected_mirror.lock().expect("mirror lock poisoned").clone();
        let mirror = match selected {
            Some(m) => m,
            None => return error::NoMirrorSelectedSnafu.fail(),
        };
        let relative = relative_path(&remote_file);
        let url = join(&mirror, &relative)?;
        let bound = bound_for(&remote_file, &Limits::default());
        let bytes = fetch_max_size(&self.transport, url, &relative, bound)?;
        let (temp_path, mut file) = self.cache.unverified_scratch(&relative)?;
        std::io::Write::write_all(&mut file, &bytes).context(error::FileWriteSnafu { path: temp_path.clone() })?;
        drop(file);
        let format = if relative.ends_with(".gz") {
            SelectedFormat::Gzip
        } else {
            SelectedFormat::Uncompressed
        };
        cb(format, &temp_path)
    }

    fn get_cached(&self, file: &str) -> Option<PathBuf> {
        self.cache.get_cached(file)
    }

    fn get_cached_root(&self) -> Result<PathBuf> {
        self.cache.get_cached_root()
    }

    fn clear_cache(&self) -> Result<()> {
        self.cache.clear_cache()
    }

    fn get_from_index(&self, pkg_name: &str, pkg_version: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        get_from_index_via(&self.cache, pkg_name, pkg_version, filename)
    }

    fn with_mirror(&self, scope: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        ensure!(!self.mirrors.is_empty(), error::NoMirrorSelectedSnafu);
        let mut last_err = None;
        for mirror in &self.mirrors {
            {
                let mut guard = self.selected_mirror.lock().expect("mirror lock poisoned");
                *guard = Some(mirror.clone());
            }
            let result = scope();
            {
                let mut guard = self.selected_mirror.lock().expect("mirror lock poisoned");
                *guard = None;
            }
            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    self.log(&format!("mirror '{mirror}' failed: {e}"));
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(error::Error::NoMirrorSelected))
    }

    fn log(&self, msg: &str) {
        info!("{msg}");
    }

    fn commit(&self, temp_path: &Path, cache_as: &str) -> Result<PathBuf> {
        self.cache.commit(temp_path, cache_as)
    }

    fn forget(&self, name: &str) -> Result<()> {
        self.cache.forget(name)
    }

    fn system_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.cache.system_time(now)
    }
}

/// Builds a pinned [`FileInfo`] for a file whose exact length and SHA-256 digest the caller
/// already knows from a trusted parent role. A thin convenience used at call sites that otherwise
/// repeat this pattern.
pub fn pin(length: u64, sha256: Vec<u8>) -> FileInfo {
    FileInfo::new(length, sha256)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_report_offered_variants() {
        assert!(Formats::Un.offers_uncompressed());
        assert!(!Formats::Un.offers_gzip());
        assert!(Formats::UnGz.offers_uncompressed());
        assert!(Formats::UnGz.offers_gzip());
    }
}
