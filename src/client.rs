// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client driver: bootstrapping trust from an out-of-band root, running a single
//! check-for-updates cycle against a [`Repository`], and resolving package downloads through the
//! verified index.

use crate::cache::INDEX_FILE_NAME;
use crate::error::{self, Result};
use crate::repository::{Formats, RemoteFile, Repository, SelectedFormat};
use crate::schema::{FileInfo, Mirrors, Role, RoleType, Root, Signed, Snapshot, Timestamp};
use crate::trust::{Trusted, TrustState};
use crate::verify;
use chrono::{DateTime, Utc};
use ring::digest::{digest, SHA256};
use snafu::{ensure, ResultExt};
use std::path::Path;

/// The client driver for a single cache directory, parameterized over a [`Repository`]
/// implementation (typically [`crate::repository::HttpRepository`], or
/// [`crate::repository::FilesystemRepository`] for an air-gapped install or a test).
#[derive(Debug)]
pub struct Client<R: Repository> {
    repo: R,
    state: TrustState,
}

fn read_and_hash(path: &Path) -> Result<(Vec<u8>, u64, Vec<u8>)> {
    let bytes = std::fs::read(path).context(error::FileReadSnafu {
        path: path.to_path_buf(),
    })?;
    let length = bytes.len() as u64;
    let sha256 = digest(&SHA256, &bytes).as_ref().to_vec();
    Ok((bytes, length, sha256))
}

/// Deserializes a signed `role` envelope, raising [`error::Error::WrongType`] if the payload's
/// `_type` tag doesn't match `T`'s role before falling through to full deserialization. Serde's
/// internally-tagged `_type` derive fails closed on a mismatch (a generic parse error), so the
/// tag has to be checked by hand to get the dedicated error kind spec.md reserves for it.
fn parse_envelope<T: Role + serde::de::DeserializeOwned>(bytes: &[u8], role: RoleType) -> Result<Signed<T>> {
    let value: serde_json::Value = serde_json::from_slice(bytes).context(error::ParseMetadataSnafu { role })?;
    if let Some(got) = value
        .get("signed")
        .and_then(|signed| signed.get("_type"))
        .and_then(serde_json::Value::as_str)
    {
        let expected = T::TYPE.to_string();
        ensure!(
            got == expected,
            error::WrongTypeSnafu {
                expected,
                got: got.to_owned(),
            }
        );
    }
    serde_json::from_value(value).context(error::ParseMetadataSnafu { role })
}

impl<R: Repository> Client<R> {
    /// Bootstraps trust from a caller-supplied `root.json` file: the out-of-band seed on first
    /// install. The root must verify under its own declared keys and threshold (it signs itself)
    /// and must not be expired.
    pub fn bootstrap(repo: R, trusted_root_path: &Path, now: DateTime<Utc>) -> Result<Self> {
        let now = repo.system_time(now)?;
        let bytes = std::fs::read(trusted_root_path).context(error::FileReadSnafu {
            path: trusted_root_path.to_path_buf(),
        })?;
        let env: Signed<Root> = parse_envelope(&bytes, RoleType::Root)?;
        let role_keys = env
            .signed
            .role_keys(RoleType::Root)
            .cloned()
            .ok_or(error::Error::UnknownKey {
                keyid: "<root role undeclared in bootstrap root>".to_owned(),
            })?;
        let key_env = env.signed.key_env()?;
        let trusted = verify::verify_envelope(&role_keys, &key_env, env)?;
        verify::check_not_expired(RoleType::Root, trusted.expires(), now)?;

        repo.commit(trusted_root_path, "root.json")?;

        Ok(Self {
            repo,
            state: TrustState::bootstrap(trusted),
        })
    }

    /// Resumes a client whose root (and possibly timestamp/snapshot/mirrors) is already cached
    /// locally from a prior run.
    pub fn resume(repo: R, now: DateTime<Utc>) -> Result<Self> {
        let now = repo.system_time(now)?;
        let root_path = repo.get_cached_root()?;
        let bytes = std::fs::read(&root_path).context(error::FileReadSnafu {
            path: root_path.clone(),
        })?;
        let env: Signed<Root> = parse_envelope(&bytes, RoleType::Root)?;
        let role_keys = env
            .signed
            .role_keys(RoleType::Root)
            .cloned()
            .ok_or(error::Error::UnknownKey {
                keyid: "<root role undeclared in cached root>".to_owned(),
            })?;
        let key_env = env.signed.key_env()?;
        let trusted_root = verify::verify_envelope(&role_keys, &key_env, env)?;
        verify::check_not_expired(RoleType::Root, trusted_root.expires(), now)?;

        let state = match (repo.get_cached("timestamp.json"), repo.get_cached("snapshot.json")) {
            (Some(ts_path), Some(snap_path)) => {
                let ts_bytes = std::fs::read(&ts_path).context(error::FileReadSnafu { path: ts_path })?;
                let ts_env: Signed<Timestamp> = parse_envelope(&ts_bytes, RoleType::Timestamp)?;
                let trusted_timestamp = verify::verify_timestamp(&trusted_root, None, ts_env, now)?;

                let snap_bytes = std::fs::read(&snap_path).context(error::FileReadSnafu { path: snap_path })?;
                let snap_env: Signed<Snapshot> = parse_envelope(&snap_bytes, RoleType::Snapshot)?;
                let trusted_snapshot = verify::verify_snapshot(&trusted_root, None, snap_env, now)?;

                let mirrors = match repo.get_cached("mirrors.json") {
                    Some(path) => {
                        let bytes = std::fs::read(&path).context(error::FileReadSnafu { path })?;
                        let env: Signed<Mirrors> = parse_envelope(&bytes, RoleType::Mirrors)?;
                        Some(verify::verify_mirrors(&trusted_root, None, env, now)?)
                    }
                    None => None,
                };

                TrustState::Fresh {
                    root: trusted_root,
                    timestamp: trusted_timestamp,
                    snapshot: trusted_snapshot,
                    mirrors,
                }
            }
            _ => TrustState::bootstrap(trusted_root),
        };

        Ok(Self { repo, state })
    }

    /// Runs a single check-for-updates cycle: fetch the timestamp, and if its pinned snapshot hash
    /// changed, the snapshot; if the snapshot's pinned root hash changed, re-bootstrap trust from a
    /// freshly fetched root first; then refresh mirrors and the package index as needed.
    ///
    /// On any verification failure the trust state is rolled back to what it was before this call
    /// (the `Updating --verification-error--> Fresh` transition); the cache is left untouched
    /// either way, since nothing is committed until it has verified.
    pub fn check_for_updates(&mut self, now: DateTime<Utc>) -> Result<()> {
        let now = self.repo.system_time(now)?;
        let root_for_placeholder = self.state.root().clone();
        let previous = std::mem::replace(&mut self.state, TrustState::bootstrap(root_for_placeholder));
        let updating = previous.clone().begin_update();

        // The whole cycle runs under a single selected mirror; `with_mirror` only advances to
        // the next candidate if the closure returns Err, so a transient failure partway through
        // (say, the index after timestamp/snapshot already refreshed) retries the entire cycle
        // against the next mirror rather than leaving state half-updated against two mirrors.
        let mut result = None;
        let outcome = self.repo.with_mirror(&mut || {
            result = Some(self.run_update(&previous, now)?);
            Ok(())
        });

        match outcome {
            Ok(()) => {
                self.state = result.expect("with_mirror succeeded without setting result");
                Ok(())
            }
            Err(e) => {
                self.state = updating.abort_update();
                Err(e)
            }
        }
    }

    fn run_update(&self, previous: &TrustState, now: DateTime<Utc>) -> Result<TrustState> {
        let mut root = previous.root().clone();
        let (previous_timestamp, previous_snapshot, previous_mirrors) = match previous {
            TrustState::Fresh {
                timestamp,
                snapshot,
                mirrors,
                ..
            } => (Some(timestamp.clone()), Some(snapshot.clone()), mirrors.clone()),
            _ => (None, None, None),
        };

        let timestamp = self.fetch_timestamp(&root, previous_timestamp.as_ref(), now)?;

        if let (Some(prev_snapshot), Some(prev_timestamp)) = (&previous_snapshot, &previous_timestamp) {
            if prev_timestamp.snapshot_file_info() == timestamp.snapshot_file_info() {
                let mirrors = self.maybe_refresh_mirrors(&root, prev_snapshot, previous_mirrors.as_ref(), now)?;
                self.maybe_refresh_index(prev_snapshot)?;
                return Ok(TrustState::Fresh {
                    root,
                    timestamp,
                    snapshot: prev_snapshot.clone(),
                    mirrors,
                });
            }
        }

        let snapshot_info = timestamp
            .snapshot_file_info()
            .cloned()
            .ok_or(error::Error::MissingFileMapEntry {
                role: RoleType::Timestamp,
                entry: "snapshot.json".to_owned(),
            })?;
        let snapshot = self.fetch_snapshot(&root, &snapshot_info, previous_snapshot.as_ref(), now)?;

        if self.root_hash_changed(&root, &snapshot)? {
            let new_root = self.fetch_and_rotate_root(&root, now)?;
            let timestamp_keys_changed = verify::role_keys_changed(root.get(), new_root.get(), RoleType::Timestamp);
            let snapshot_keys_changed = verify::role_keys_changed(root.get(), new_root.get(), RoleType::Snapshot);
            root = new_root;
            if timestamp_keys_changed || snapshot_keys_changed {
                self.repo.clear_cache()?;
                return Ok(TrustState::bootstrap(root));
            }
        }

        let mirrors = self.maybe_refresh_mirrors(&root, &snapshot, previous_mirrors.as_ref(), now)?;
        self.maybe_refresh_index(&snapshot)?;

        Ok(TrustState::Fresh {
            root,
            timestamp,
            snapshot,
            mirrors,
        })
    }

    fn fetch_timestamp(
        &self,
        root: &Trusted<Root>,
        previous: Option<&Trusted<Timestamp>>,
        now: DateTime<Utc>,
    ) -> Result<Trusted<Timestamp>> {
        let mut result = None;
        self.repo.with_remote(RemoteFile::Timestamp, &mut |_format, path| {
            let bytes = std::fs::read(path).context(error::FileReadSnafu {
                path: path.to_path_buf(),
            })?;
            let env: Signed<Timestamp> = parse_envelope(&bytes, RoleType::Timestamp)?;
            let trusted = verify::verify_timestamp(root, previous, env, now)?;
            self.repo.commit(path, "timestamp.json")?;
            result = Some(trusted);
            Ok(())
        })?;
        result.ok_or(error::Error::NoMirrorSelected)
    }

    fn fetch_snapshot(
        &self,
        root: &Trusted<Root>,
        pinned: &FileInfo,
        previous: Option<&Trusted<Snapshot>>,
        now: DateTime<Utc>,
    ) -> Result<Trusted<Snapshot>> {
        let mut result = None;
        self.repo
            .with_remote(RemoteFile::Snapshot { len: pinned.length }, &mut |_format, path| {
                let (bytes, length, sha256) = read_and_hash(path)?;
                verify::check_file_info("snapshot.json", pinned, length, &sha256)?;
                let env: Signed<Snapshot> = parse_envelope(&bytes, RoleType::Snapshot)?;
                let trusted = verify::verify_snapshot(root, previous, env, now)?;
                self.repo.commit(path, "snapshot.json")?;
                result = Some(trusted);
                Ok(())
            })?;
        result.ok_or(error::Error::NoMirrorSelected)
    }

    fn root_hash_changed(&self, root: &Trusted<Root>, snapshot: &Trusted<Snapshot>) -> Result<bool> {
        let Some(pinned) = snapshot.root_file_info() else {
            return Ok(false);
        };
        let canonical = root.canonical_form()?;
        let sha256 = digest(&SHA256, &canonical).as_ref().to_vec();
        Ok(!pinned.matches_actual(canonical.len() as u64, &sha256))
    }

    fn fetch_and_rotate_root(&self, old_root: &Trusted<Root>, now: DateTime<Utc>) -> Result<Trusted<Root>> {
        let mut result = None;
        self.repo.with_remote(RemoteFile::Root { size: None }, &mut |_format, path| {
            let bytes = std::fs::read(path).context(error::FileReadSnafu {
                path: path.to_path_buf(),
            })?;
            let candidate: Signed<Root> = parse_envelope(&bytes, RoleType::Root)?;
            let trusted = verify::verify_root_update(old_root, candidate, now)?;
            self.repo.commit(path, "root.json")?;
            result = Some(trusted);
            Ok(())
        })?;
        result.ok_or(error::Error::NoMirrorSelected)
    }

    fn maybe_refresh_mirrors(
        &self,
        root: &Trusted<Root>,
        snapshot: &Trusted<Snapshot>,
        previous: Option<&Trusted<Mirrors>>,
        now: DateTime<Utc>,
    ) -> Result<Option<Trusted<Mirrors>>> {
        // Absence of a mirrors entry in the snapshot means "use only out-of-band mirrors";
        // whatever was previously trusted (if anything) is carried forward unchanged.
        let Some(pinned) = snapshot.mirrors_file_info() else {
            return Ok(previous.cloned());
        };
        let mut result = None;
        self.repo
            .with_remote(RemoteFile::Mirrors { len: pinned.length }, &mut |_format, path| {
                let (bytes, length, sha256) = read_and_hash(path)?;
                verify::check_file_info("mirrors.json", pinned, length, &sha256)?;
                let env: Signed<Mirrors> = parse_envelope(&bytes, RoleType::Mirrors)?;
                let trusted = verify::verify_mirrors(root, previous, env, now)?;
                self.repo.commit(path, "mirrors.json")?;
                result = Some(trusted);
                Ok(())
            })?;
        Ok(result)
    }

    fn maybe_refresh_index(&self, snapshot: &Trusted<Snapshot>) -> Result<()> {
        let uncompressed = snapshot.index_file_info(INDEX_FILE_NAME);
        let gzip_name = format!("{INDEX_FILE_NAME}.gz");
        let gzip = snapshot.index_file_info(&gzip_name);
        let (formats, lens) = match (uncompressed, gzip) {
            (Some(u), Some(g)) => (Formats::UnGz, vec![u.length, g.length]),
            (Some(u), None) => (Formats::Un, vec![u.length]),
            (None, Some(g)) => (Formats::Gz, vec![g.length]),
            (None, None) => return Ok(()),
        };

        self.repo.with_remote(RemoteFile::Index { formats, lens }, &mut |format, path| {
            let (_bytes, length, sha256) = read_and_hash(path)?;
            let expected = if format == SelectedFormat::Uncompressed {
                uncompressed
            } else {
                gzip
            };
            if let Some(expected) = expected {
                verify::check_file_info(INDEX_FILE_NAME, expected, length, &sha256)?;
            }
            self.repo.commit(path, INDEX_FILE_NAME)?;
            self.repo.forget(&format!("{INDEX_FILE_NAME}.idx"))?;
            Ok(())
        })
    }

    /// Looks up a file within the package index, assuming the index is already fresh (a prior
    /// [`Client::check_for_updates`] call succeeded). Returns `Ok(None)` if the index has no such
    /// entry.
    pub fn read_from_index(&self, pkg_name: &str, pkg_version: &str, filename: &str) -> Result<Option<Vec<u8>>> {
        self.repo.get_from_index(pkg_name, pkg_version, filename)
    }

    /// Fetches a package tarball whose pinned `FileInfo` the caller already resolved (typically
    /// from a `.cabal` file or a targets entry obtained via [`Client::read_from_index`]).
    pub fn download_package(&self, pkg_id: &str, pinned: &FileInfo) -> Result<Vec<u8>> {
        let mut result = None;
        self.repo.with_mirror(&mut || {
            self.repo.with_remote(
                RemoteFile::PkgTarGz {
                    pkg_id: pkg_id.to_owned(),
                    len: pinned.length,
                },
                &mut |_format, path| {
                    let (bytes, length, sha256) = read_and_hash(path)?;
                    verify::check_file_info(pkg_id, pinned, length, &sha256)?;
                    result = Some(bytes);
                    Ok(())
                },
            )
        })?;
        result.ok_or(error::Error::NoMirrorSelected)
    }

    /// The client's current trust state, mostly useful for tests and diagnostics.
    pub fn state(&self) -> &TrustState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FileMap, Key, KeyId, RoleKeys, Signature};
    use chrono::TimeZone;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, HashSet};
    use std::num::NonZeroU64;
    use std::path::PathBuf;

    // ---- fixture helpers --------------------------------------------------------------------

    fn far_future() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap()
    }

    fn gen_keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn key_of(kp: &Ed25519KeyPair) -> (KeyId, Key) {
        let key = Key::new_ed25519(kp.public_key().as_ref().to_vec());
        let id = key.key_id().unwrap();
        (id, key)
    }

    fn role_keys(ids: &[KeyId], threshold: u64) -> RoleKeys {
        RoleKeys {
            keyids: ids.to_vec(),
            threshold: NonZeroU64::new(threshold).unwrap(),
            _extra: HashMap::new(),
        }
    }

    fn sign<T: Role + Clone>(payload: &T, signers: &[&Ed25519KeyPair]) -> Signed<T> {
        let canonical = payload.canonical_form().unwrap();
        let signatures = signers
            .iter()
            .map(|kp| {
                let (keyid, _) = key_of(kp);
                Signature {
                    keyid,
                    method: "ed25519".to_owned(),
                    sig: crate::keys::sign_for_test(kp, &canonical).into(),
                }
            })
            .collect();
        Signed {
            signed: payload.clone(),
            signatures,
        }
    }

    fn to_bytes<T: serde::Serialize>(env: &Signed<T>) -> Vec<u8> {
        serde_json::to_vec(env).unwrap()
    }

    fn file_info_of(bytes: &[u8]) -> FileInfo {
        let sha256 = digest(&SHA256, bytes).as_ref().to_vec();
        FileInfo::new(bytes.len() as u64, sha256)
    }

    fn build_root(
        root_ids: &[KeyId],
        ts_ids: &[KeyId],
        snapshot_ids: &[KeyId],
        mirrors_ids: &[KeyId],
        keys: Vec<(KeyId, Key)>,
        version: u64,
    ) -> Root {
        let mut roles = HashMap::new();
        roles.insert(RoleType::Root, role_keys(root_ids, 1));
        roles.insert(RoleType::Timestamp, role_keys(ts_ids, 1));
        roles.insert(RoleType::Snapshot, role_keys(snapshot_ids, 1));
        roles.insert(RoleType::Mirrors, role_keys(mirrors_ids, 1));
        Root {
            spec_version: "1.0.0".to_owned(),
            consistent_snapshot: false,
            version: NonZeroU64::new(version).unwrap(),
            expires: far_future(),
            keys: keys.into_iter().collect(),
            roles,
            _extra: HashMap::new(),
        }
    }

    fn build_timestamp(version: u64, snapshot_info: FileInfo) -> Timestamp {
        let mut meta = FileMap::new();
        meta.insert("snapshot.json".to_owned(), snapshot_info);
        Timestamp {
            spec_version: "1.0.0".to_owned(),
            version: NonZeroU64::new(version).unwrap(),
            expires: far_future(),
            meta,
            _extra: HashMap::new(),
        }
    }

    fn build_snapshot(version: u64, root_info: FileInfo, mirrors_info: FileInfo, index_info: FileInfo) -> Snapshot {
        let mut meta = FileMap::new();
        meta.insert("root.json".to_owned(), root_info);
        meta.insert("mirrors.json".to_owned(), mirrors_info);
        meta.insert(INDEX_FILE_NAME.to_owned(), index_info);
        Snapshot {
            spec_version: "1.0.0".to_owned(),
            version: NonZeroU64::new(version).unwrap(),
            expires: far_future(),
            meta,
            _extra: HashMap::new(),
        }
    }

    fn build_mirrors(version: u64) -> Mirrors {
        Mirrors {
            spec_version: "1.0.0".to_owned(),
            version: NonZeroU64::new(version).unwrap(),
            expires: far_future(),
            mirrors: Vec::new(),
            _extra: HashMap::new(),
        }
    }

    fn file_name_for(remote_file: &RemoteFile) -> String {
        match remote_file {
            RemoteFile::Timestamp => "timestamp.json".to_owned(),
            RemoteFile::Root { .. } => "root.json".to_owned(),
            RemoteFile::Snapshot { .. } => "snapshot.json".to_owned(),
            RemoteFile::Mirrors { .. } => "mirrors.json".to_owned(),
            RemoteFile::Index { .. } => INDEX_FILE_NAME.to_owned(),
            RemoteFile::PkgTarGz { pkg_id, .. } => format!("package/{pkg_id}.tar.gz"),
        }
    }

    /// An in-crate `Repository` fake: real files on disk under a tempdir (for realistic
    /// cache/commit semantics), but with fetches served out of an in-memory map and per-mirror
    /// failures injectable by the test, so mirror failover can be exercised without a network
    /// stack.
    #[derive(Debug)]
    struct FakeRepository {
        dir: tempfile::TempDir,
        mirror_count: usize,
        selected_mirror: Cell<Option<usize>>,
        unreachable: RefCell<HashSet<(usize, String)>>,
        remote_content: RefCell<HashMap<String, Vec<u8>>>,
    }

    impl FakeRepository {
        fn new(mirror_count: usize) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                mirror_count,
                selected_mirror: Cell::new(None),
                unreachable: RefCell::new(HashSet::new()),
                remote_content: RefCell::new(HashMap::new()),
            }
        }

        /// Writes `bytes` directly into the cache, bypassing `with_remote`, to seed state a real
        /// client would have persisted from a prior run.
        fn seed_local(&self, name: &str, bytes: &[u8]) {
            std::fs::write(self.dir.path().join(name), bytes).unwrap();
        }

        /// Registers the bytes a fetch for `name` should return, regardless of which mirror is
        /// selected.
        fn serve(&self, name: &str, bytes: Vec<u8>) {
            self.remote_content.borrow_mut().insert(name.to_owned(), bytes);
        }

        /// Makes mirror `idx` fail any fetch for `name` with a transport error.
        fn mark_unreachable(&self, idx: usize, name: &str) {
            self.unreachable.borrow_mut().insert((idx, name.to_owned()));
        }
    }

    impl Repository for FakeRepository {
        fn with_remote(
            &self,
            remote_file: RemoteFile,
            cb: &mut dyn FnMut(SelectedFormat, &Path) -> Result<()>,
        ) -> Result<()> {
            let idx = self.selected_mirror.get().expect("with_remote called outside with_mirror");
            let name = file_name_for(&remote_file);
            if self.unreachable.borrow().contains(&(idx, name.clone())) {
                return Err(error::Error::CustomTransport {
                    url: format!("fake://mirror-{idx}/{name}"),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "fake mirror unreachable",
                    )),
                });
            }
            let bytes = self
                .remote_content
                .borrow()
                .get(&name)
                .unwrap_or_else(|| panic!("no fixture content registered for '{name}'"))
                .clone();
            let unverified = self.dir.path().join("unverified");
            std::fs::create_dir_all(&unverified).unwrap();
            let temp_path = unverified.join(&name);
            std::fs::write(&temp_path, &bytes).unwrap();
            let format = if name.ends_with(".gz") {
                SelectedFormat::Gzip
            } else {
                SelectedFormat::Uncompressed
            };
            cb(format, &temp_path)
        }

        fn get_cached(&self, file: &str) -> Option<PathBuf> {
            let path = self.dir.path().join(file);
            path.is_file().then_some(path)
        }

        fn get_cached_root(&self) -> Result<PathBuf> {
            let path = self.dir.path().join("root.json");
            ensure!(
                path.is_file(),
                error::DatastoreOpenSnafu {
                    path: path.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }
            );
            Ok(path)
        }

        fn clear_cache(&self) -> Result<()> {
            for name in ["timestamp.json", "snapshot.json"] {
                let path = self.dir.path().join(name);
                if path.is_file() {
                    std::fs::remove_file(&path).unwrap();
                }
            }
            Ok(())
        }

        fn get_from_index(&self, _pkg_name: &str, _pkg_version: &str, _filename: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn with_mirror(&self, scope: &mut dyn FnMut() -> Result<()>) -> Result<()> {
            let mut last_err = None;
            for idx in 0..self.mirror_count {
                self.selected_mirror.set(Some(idx));
                let result = scope();
                self.selected_mirror.set(None);
                match result {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err.unwrap_or(error::Error::NoMirrorSelected))
        }

        fn log(&self, _msg: &str) {}

        fn commit(&self, temp_path: &Path, cache_as: &str) -> Result<PathBuf> {
            let dest = self.dir.path().join(cache_as);
            std::fs::copy(temp_path, &dest).context(error::DatastoreCommitSnafu { path: dest.clone() })?;
            Ok(dest)
        }

        fn forget(&self, name: &str) -> Result<()> {
            let path = self.dir.path().join(name);
            if path.is_file() {
                std::fs::remove_file(&path).unwrap();
            }
            Ok(())
        }

        fn system_time(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
            Ok(now)
        }
    }

    struct OneRoleWorld {
        root_kp: Ed25519KeyPair,
        ts_kp: Ed25519KeyPair,
        snapshot_kp: Ed25519KeyPair,
        root1: Root,
        root1_bytes: Vec<u8>,
    }

    fn one_role_world() -> OneRoleWorld {
        let root_kp = gen_keypair();
        let ts_kp = gen_keypair();
        let snapshot_kp = gen_keypair();
        let (root_id, root_key) = key_of(&root_kp);
        let (ts_id, ts_key) = key_of(&ts_kp);
        let (snapshot_id, snapshot_key) = key_of(&snapshot_kp);
        let root1 = build_root(
            &[root_id.clone()],
            &[ts_id.clone()],
            &[snapshot_id.clone()],
            &[snapshot_id.clone()],
            vec![
                (root_id, root_key),
                (ts_id, ts_key),
                (snapshot_id, snapshot_key),
            ],
            1,
        );
        let root1_bytes = to_bytes(&sign(&root1, &[&root_kp]));
        OneRoleWorld {
            root_kp,
            ts_kp,
            snapshot_kp,
            root1,
            root1_bytes,
        }
    }

    #[test]
    fn check_for_updates_rejects_stale_timestamp_version_and_leaves_state_unchanged() {
        let world = one_role_world();

        let mirrors1_bytes = to_bytes(&sign(&build_mirrors(1), &[&world.snapshot_kp]));
        let index1_bytes = b"index-v1".to_vec();
        let snapshot1 = build_snapshot(
            1,
            file_info_of(&world.root1_bytes),
            file_info_of(&mirrors1_bytes),
            file_info_of(&index1_bytes),
        );
        let snapshot1_bytes = to_bytes(&sign(&snapshot1, &[&world.snapshot_kp]));
        let snapshot1_info = file_info_of(&snapshot1_bytes);
        let timestamp5_bytes = to_bytes(&sign(&build_timestamp(5, snapshot1_info.clone()), &[&world.ts_kp]));

        let fake = FakeRepository::new(1);
        fake.seed_local("root.json", &world.root1_bytes);
        fake.seed_local("timestamp.json", &timestamp5_bytes);
        fake.seed_local("snapshot.json", &snapshot1_bytes);
        fake.seed_local("mirrors.json", &mirrors1_bytes);

        // The fetched timestamp is version 4: a rollback relative to the version 5 already
        // trusted, even though it is validly signed and still pins the same snapshot.
        let timestamp4_bytes = to_bytes(&sign(&build_timestamp(4, snapshot1_info), &[&world.ts_kp]));
        fake.serve("timestamp.json", timestamp4_bytes);

        let now = far_future() - chrono::Duration::days(1);
        let mut client = Client::resume(fake, now).unwrap();
        match client.state() {
            TrustState::Fresh { timestamp, .. } => assert_eq!(timestamp.version().get(), 5),
            other => panic!("expected a resumed Fresh state, got {other:?}"),
        }

        let err = client.check_for_updates(now).unwrap_err();
        assert!(matches!(err, error::Error::VersionRollback { role: RoleType::Timestamp, have: 5, got: 4 }));

        match client.state() {
            TrustState::Fresh { timestamp, .. } => assert_eq!(timestamp.version().get(), 5),
            other => panic!("state should roll back to the pre-update Fresh value, got {other:?}"),
        }
    }

    #[test]
    fn check_for_updates_retries_next_mirror_on_failure() {
        let world = one_role_world();

        let mirrors1_bytes = to_bytes(&sign(&build_mirrors(1), &[&world.snapshot_kp]));
        let index1_bytes = b"index-v1".to_vec();
        let snapshot1 = build_snapshot(
            1,
            file_info_of(&world.root1_bytes),
            file_info_of(&mirrors1_bytes),
            file_info_of(&index1_bytes),
        );
        let snapshot1_bytes = to_bytes(&sign(&snapshot1, &[&world.snapshot_kp]));
        let timestamp1_bytes = to_bytes(&sign(&build_timestamp(1, file_info_of(&snapshot1_bytes)), &[&world.ts_kp]));

        let fake = FakeRepository::new(2);
        fake.serve("timestamp.json", timestamp1_bytes);
        fake.serve("snapshot.json", snapshot1_bytes);
        fake.serve("mirrors.json", mirrors1_bytes);
        fake.serve(INDEX_FILE_NAME, index1_bytes);
        fake.mark_unreachable(0, "timestamp.json");

        let root_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(root_file.path(), &world.root1_bytes).unwrap();
        let now = far_future() - chrono::Duration::days(1);
        let mut client = Client::bootstrap(fake, root_file.path(), now).unwrap();

        client.check_for_updates(now).unwrap();
        match client.state() {
            TrustState::Fresh { timestamp, snapshot, .. } => {
                assert_eq!(timestamp.version().get(), 1);
                assert_eq!(snapshot.version().get(), 1);
            }
            other => panic!("expected Fresh after a successful failover, got {other:?}"),
        }
    }

    #[test]
    fn check_for_updates_rotates_root_and_invalidates_cache_on_key_change() {
        let world = one_role_world();
        let (root_id, root_key) = key_of(&world.root_kp);
        let (ts_id, ts_key) = key_of(&world.ts_kp);
        let snapshot2_kp = gen_keypair();
        let (snapshot2_id, snapshot2_key) = key_of(&snapshot2_kp);

        let root2 = build_root(
            &[root_id.clone()],
            &[ts_id.clone()],
            &[snapshot2_id.clone()],
            &[snapshot2_id.clone()],
            vec![(root_id, root_key), (ts_id, ts_key), (snapshot2_id, snapshot2_key)],
            2,
        );
        let root2_bytes = to_bytes(&sign(&root2, &[&world.root_kp]));

        // snapshot2 is still verified under the OLD root (its key hasn't rotated yet at the
        // point this snapshot is fetched), but pins the NEW root's bytes, signaling the rotation.
        let mirrors1_bytes = to_bytes(&sign(&build_mirrors(1), &[&world.snapshot_kp]));
        let index1_bytes = b"index-v1".to_vec();
        let snapshot2 = build_snapshot(
            2,
            file_info_of(&root2_bytes),
            file_info_of(&mirrors1_bytes),
            file_info_of(&index1_bytes),
        );
        let snapshot2_bytes = to_bytes(&sign(&snapshot2, &[&world.snapshot_kp]));
        let timestamp2_bytes = to_bytes(&sign(&build_timestamp(2, file_info_of(&snapshot2_bytes)), &[&world.ts_kp]));

        let fake = FakeRepository::new(1);
        fake.serve("timestamp.json", timestamp2_bytes);
        fake.serve("snapshot.json", snapshot2_bytes);
        fake.serve("root.json", root2_bytes);

        let root_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(root_file.path(), &world.root1_bytes).unwrap();
        let now = far_future() - chrono::Duration::days(1);
        let mut client = Client::bootstrap(fake, root_file.path(), now).unwrap();

        client.check_for_updates(now).unwrap();
        match client.state() {
            TrustState::Bootstrap { root } => assert_eq!(root.version().get(), 2),
            other => panic!("a snapshot/timestamp key rotation should reset to Bootstrap, got {other:?}"),
        }
    }
}
