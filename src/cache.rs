// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The local trusted cache: the on-disk layout, the atomic write-temp/fsync/rename protocol that
//! keeps unverified bytes out of the trusted set, and the monotonic clock guard used to resist
//! freeze attacks across process restarts.

use crate::error::{self, Result};
use chrono::{DateTime, Utc};
use snafu::{ensure, ResultExt};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::NamedTempFile;

/// The hardcoded name of the package index, per the spec's open question: flagged for
/// abstraction upstream, still hardcoded here pending that decision.
pub const INDEX_FILE_NAME: &str = "00-index.tar";

/// The local trusted cache directory.
///
/// `LocalCache` does not itself decide what is trustworthy — callers only ever call
/// [`LocalCache::commit`] with bytes that have already passed [`crate::verify::check_file_info`]
/// or full envelope verification. Its job is purely to make the on-disk swap atomic and to guard
/// against a stepped-back system clock.
#[derive(Debug)]
pub struct LocalCache {
    root: PathBuf,
    time_lock: Arc<RwLock<()>>,
}

impl LocalCache {
    /// Opens (creating if necessary) a cache rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).context(error::DatastoreInitSnafu)?;
        fs::create_dir_all(root.join("unverified")).context(error::DatastoreInitSnafu)?;
        Ok(Self {
            root,
            time_lock: Arc::new(RwLock::new(())),
        })
    }

    /// The path a cached file named `name` would live at, regardless of whether it currently
    /// exists.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns the path to `name` if it is present in the cache.
    pub fn get_cached(&self, name: &str) -> Option<PathBuf> {
        let path = self.path(name);
        path.is_file().then_some(path)
    }

    /// Returns the path to the trusted root. Its absence is fatal: a client cannot operate
    /// without a root of trust, bootstrapped out-of-band on first run.
    pub fn get_cached_root(&self) -> Result<PathBuf> {
        let path = self.path("root.json");
        ensure!(
            path.is_file(),
            error::DatastoreOpenSnafu {
                path: path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
        );
        Ok(path)
    }

    /// Drops the cached timestamp and snapshot, used after a root rotation changes the
    /// timestamp or snapshot role's keys: the next fetch is treated as first-use.
    pub fn clear_cache(&self) -> Result<()> {
        for name in ["timestamp.json", "snapshot.json"] {
            let path = self.path(name);
            if path.is_file() {
                fs::remove_file(&path).context(error::DatastoreRemoveSnafu { path })?;
            }
        }
        Ok(())
    }

    /// Drops a single cached file, if present. Used to invalidate the index side-car once the
    /// index itself has been replaced, so the next lookup rebuilds it.
    pub fn forget(&self, name: &str) -> Result<()> {
        let path = self.path(name);
        if path.is_file() {
            fs::remove_file(&path).context(error::DatastoreRemoveSnafu { path })?;
        }
        Ok(())
    }

    /// Opens a scratch file under `unverified/` that the caller can stream bytes into before
    /// they've been checked against a `FileInfo`. The returned path is never treated as trusted.
    pub fn unverified_scratch(&self, name: &str) -> Result<(PathBuf, File)> {
        let dir = self.root.join("unverified");
        let path = dir.join(name);
        let file = File::create(&path).context(error::DatastoreCreateSnafu { path: dir })?;
        Ok((path, file))
    }

    /// Verified handoff: atomically replaces the cached file named `cache_as` with the bytes in
    /// `temp_path`, which must already have passed its `FileInfo` check. Implemented as
    /// write-temp (already done by the caller) + fsync + rename, so a verified replacement never
    /// leaves the cache in a torn state and concurrent readers always see a self-consistent set.
    pub fn commit(&self, temp_path: &Path, cache_as: &str) -> Result<PathBuf> {
        let dest = self.path(cache_as);
        let mut staged = NamedTempFile::new_in(&self.root).context(error::DatastoreCreateSnafu {
            path: self.root.clone(),
        })?;
        let bytes = fs::read(temp_path).context(error::FileReadSnafu {
            path: temp_path.to_path_buf(),
        })?;
        staged
            .write_all(&bytes)
            .context(error::FileWriteSnafu { path: dest.clone() })?;
        staged
            .as_file()
            .sync_all()
            .context(error::FileWriteSnafu { path: dest.clone() })?;
        staged
            .persist(&dest)
            .map_err(|e| error::Error::DatastoreCommit {
                path: dest.clone(),
                source: e.error,
            })?;
        Ok(dest)
    }

    /// Serializes `value` as canonical-adjacent pretty JSON and commits it under `cache_as`.
    /// Used for role documents whose on-disk form doesn't need to match the exact bytes fetched
    /// (a caller that already has the verified raw bytes should call [`LocalCache::commit`]
    /// instead, to avoid any re-serialization drift).
    pub fn commit_json<T: serde::Serialize>(&self, value: &T, cache_as: &str) -> Result<PathBuf> {
        let dest = self.path(cache_as);
        let mut staged = NamedTempFile::new_in(&self.root).context(error::DatastoreCreateSnafu {
            path: self.root.clone(),
        })?;
        serde_json::to_writer(&mut staged, value).context(error::DatastoreSerializeSnafu {
            what: cache_as.to_owned(),
            path: dest.clone(),
        })?;
        staged
            .as_file()
            .sync_all()
            .context(error::FileWriteSnafu { path: dest.clone() })?;
        staged
            .persist(&dest)
            .map_err(|e| error::Error::DatastoreCommit {
                path: dest.clone(),
                source: e.error,
            })?;
        Ok(dest)
    }

    /// Validates `now` (the caller's wall-clock sample) against the latest time this cache has
    /// ever observed, failing if it has stepped backward, then records it as the new high-water
    /// mark. The mark is itself persisted, so the guard survives process restarts (the mechanism
    /// a freeze attack has to defeat).
    pub fn system_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let _guard = self
            .time_lock
            .write()
            .map_err(|e| error::Error::DatastoreTimeLock {
                message: e.to_string(),
            })?;
        let marker = self.path("latest_known_time.json");
        let latest_known_time: Option<DateTime<Utc>> = if marker.is_file() {
            let bytes = fs::read(&marker).context(error::FileReadSnafu { path: marker.clone() })?;
            Some(
                serde_json::from_slice(&bytes)
                    .context(error::ParseIndexSnafu { path: marker.clone() })?,
            )
        } else {
            None
        };
        if let Some(latest) = latest_known_time {
            ensure!(
                now >= latest,
                error::SystemTimeSteppedBackwardSnafu {
                    sys_time: now,
                    latest_known_time: latest,
                }
            );
        }
        self.commit_json(&now, "latest_known_time.json")?;
        Ok(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_is_visible_and_overwrites_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let (temp_path, mut temp_file) = cache.unverified_scratch("root.json").unwrap();
        temp_file.write_all(b"{\"v\":1}").unwrap();
        drop(temp_file);
        let dest = cache.commit(&temp_path, "root.json").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{\"v\":1}");

        let (temp_path2, mut temp_file2) = cache.unverified_scratch("root.json").unwrap();
        temp_file2.write_all(b"{\"v\":2}").unwrap();
        drop(temp_file2);
        cache.commit(&temp_path2, "root.json").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{\"v\":2}");
    }

    #[test]
    fn clear_cache_drops_only_timestamp_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        for name in ["root.json", "timestamp.json", "snapshot.json"] {
            let (temp_path, mut f) = cache.unverified_scratch(name).unwrap();
            f.write_all(b"{}").unwrap();
            drop(f);
            cache.commit(&temp_path, name).unwrap();
        }
        cache.clear_cache().unwrap();
        assert!(cache.get_cached("root.json").is_some());
        assert!(cache.get_cached("timestamp.json").is_none());
        assert!(cache.get_cached("snapshot.json").is_none());
    }

    #[test]
    fn system_time_rejects_backward_step() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let future = Utc::now() + chrono::Duration::days(1);
        cache.commit_json(&future, "latest_known_time.json").unwrap();
        assert!(cache.system_time(Utc::now()).is_err());
    }

    #[test]
    fn system_time_accepts_forward_step_and_persists_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path()).unwrap();
        let first = Utc::now();
        assert_eq!(cache.system_time(first).unwrap(), first);
        let second = first + chrono::Duration::seconds(1);
        assert_eq!(cache.system_time(second).unwrap(), second);
    }
}
