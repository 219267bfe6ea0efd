// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The TUF-variant metadata types: `root`, `timestamp`, `snapshot`, `mirrors`, and `targets`
//! (with delegations), plus the `FileInfo`/`FileMap` types used to pin one role's trust in the
//! bytes of another.

mod de;
pub mod pattern;

pub use crate::keys::{Key, KeyEnv, KeyId};
pub use pattern::Pattern;

use crate::canonical::to_canonical_vec;
use crate::decoded::{Decoded, Hex};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_plain::{forward_display_to_serde, forward_from_str_to_serde};
use std::collections::HashMap;
use std::num::NonZeroU64;
use url::Url;

/// The type of metadata role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RoleType {
    /// The root role delegates trust to specific keys trusted for all other top-level roles.
    Root,
    /// The snapshot role records the versions of the index and of root/mirrors.
    Snapshot,
    /// The targets role (and its delegations) names the target files clients may trust.
    Targets,
    /// The timestamp role points at the latest snapshot, limiting replay windows.
    Timestamp,
    /// The mirrors role lists the repository's mirror set.
    Mirrors,
}

forward_display_to_serde!(RoleType);
forward_from_str_to_serde!(RoleType);

/// Common behavior of every role payload.
pub trait Role: Serialize {
    /// The role type this payload represents.
    const TYPE: RoleType;

    /// When this metadata should be considered expired.
    fn expires(&self) -> DateTime<Utc>;

    /// The monotonically increasing version of this metadata.
    fn version(&self) -> NonZeroU64;

    /// The deterministic JSON serialization used when computing/verifying signatures.
    fn canonical_form(&self) -> Result<Vec<u8>> {
        to_canonical_vec(self)
    }
}

/// A signed metadata envelope: a role payload plus the signatures over its canonical form.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signed<T> {
    /// The signed payload.
    pub signed: T,
    /// Signatures over `canonical(signed)`.
    pub signatures: Vec<Signature>,
}

/// A single signature entry in a [`Signed`] envelope.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Signature {
    /// The key ID that produced this signature.
    pub keyid: KeyId,
    /// The signature method. Only `"ed25519"` is recognized.
    pub method: String,
    /// The hex-encoded signature bytes.
    pub sig: Decoded<Hex>,
}

/// A `(length, hashes)` pair describing a remote or cached file, used to pin one role's trust in
/// the bytes of another file (the index, root.json, a target, ...).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FileInfo {
    /// The file's length in bytes.
    pub length: u64,
    /// Digests of the file, keyed by algorithm name (e.g. `"sha256"`).
    pub hashes: HashMap<String, Decoded<Hex>>,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl FileInfo {
    /// Builds a `FileInfo` with a single SHA-256 digest, the mandatory algorithm.
    pub fn new(length: u64, sha256: Vec<u8>) -> Self {
        let mut hashes = HashMap::new();
        hashes.insert("sha256".to_owned(), sha256.into());
        Self {
            length,
            hashes,
            _extra: HashMap::new(),
        }
    }

    /// Returns this `FileInfo`'s SHA-256 digest, if present.
    pub fn sha256(&self) -> Option<&Decoded<Hex>> {
        self.hashes.get("sha256")
    }

    /// Two `FileInfo`s match iff their lengths are equal and at least one shared hash algorithm
    /// yields equal digests.
    pub fn matches(&self, other: &FileInfo) -> bool {
        if self.length != other.length {
            return false;
        }
        let mut shared = false;
        for (algo, digest) in &self.hashes {
            if let Some(other_digest) = other.hashes.get(algo) {
                shared = true;
                if digest != other_digest {
                    return false;
                }
            }
        }
        shared
    }

    /// Checks `actual` (length and SHA-256 digest of bytes actually read) against this
    /// `FileInfo`, the mandatory algorithm per spec.
    pub fn matches_actual(&self, length: u64, sha256: &[u8]) -> bool {
        if self.length != length {
            return false;
        }
        match self.sha256() {
            Some(expected) => expected.as_bytes() == sha256,
            None => false,
        }
    }
}

/// An ordered mapping from repository-relative path to [`FileInfo`].
pub type FileMap = HashMap<String, FileInfo>;

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `root.json` role: establishes which keys (and thresholds) are authorized for every other
/// role, including root itself.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "root")]
pub struct Root {
    /// The TUF spec version this document claims to follow.
    pub spec_version: String,
    /// Whether the repository names targets and certain metadata files by content digest.
    pub consistent_snapshot: bool,
    /// The monotonically increasing version of this root.
    pub version: NonZeroU64,
    /// When this root expires.
    pub expires: DateTime<Utc>,
    /// Every key referenced by any role below, keyed by its KeyId.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<KeyId, Key>,
    /// The key IDs and threshold authorized for each role.
    pub roles: HashMap<RoleType, RoleKeys>,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// The key IDs and signature threshold authorized for a single role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RoleKeys {
    /// The key IDs authorized for this role.
    pub keyids: Vec<KeyId>,
    /// The number of distinct, valid signatures required.
    pub threshold: NonZeroU64,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    pub _extra: HashMap<String, Value>,
}

impl Root {
    /// Returns the `RoleKeys` for `role`, if this root delegates to it.
    pub fn role_keys(&self, role: RoleType) -> Option<&RoleKeys> {
        self.roles.get(&role)
    }

    /// Builds the `KeyEnv` implied by this root's `keys` map.
    pub fn key_env(&self) -> Result<KeyEnv> {
        let mut env = KeyEnv::new();
        env.extend(&self.keys)?;
        Ok(env)
    }
}

impl Role for Root {
    const TYPE: RoleType = RoleType::Root;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `timestamp.json` role: points at the latest `snapshot.json` and nothing else, kept small
/// so it can be re-signed and re-fetched cheaply.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "timestamp")]
pub struct Timestamp {
    /// The TUF spec version this document claims to follow.
    pub spec_version: String,
    /// The monotonically increasing version of this timestamp.
    pub version: NonZeroU64,
    /// When this timestamp expires.
    pub expires: DateTime<Utc>,
    /// A `FileMap` with exactly one entry, for `snapshot.json`.
    pub meta: FileMap,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Timestamp {
    /// Returns the `FileInfo` for `snapshot.json`, if present.
    pub fn snapshot_file_info(&self) -> Option<&FileInfo> {
        self.meta.get("snapshot.json")
    }
}

impl Role for Timestamp {
    const TYPE: RoleType = RoleType::Timestamp;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `snapshot.json` role: a `FileMap` covering `root.json`, `mirrors.json`, and the package
/// index, used to pin the next fetch of each.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "snapshot")]
pub struct Snapshot {
    /// The TUF spec version this document claims to follow.
    pub spec_version: String,
    /// The monotonically increasing version of this snapshot.
    pub version: NonZeroU64,
    /// When this snapshot expires.
    pub expires: DateTime<Utc>,
    /// `FileInfo` for `root.json`, `mirrors.json`, and the index file(s).
    pub meta: FileMap,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Snapshot {
    /// Returns the `FileInfo` for `root.json`.
    pub fn root_file_info(&self) -> Option<&FileInfo> {
        self.meta.get("root.json")
    }

    /// Returns the `FileInfo` for `mirrors.json`.
    pub fn mirrors_file_info(&self) -> Option<&FileInfo> {
        self.meta.get("mirrors.json")
    }

    /// Returns the `FileInfo` for the index file named `name` (`00-index.tar` or
    /// `00-index.tar.gz`).
    pub fn index_file_info(&self, name: &str) -> Option<&FileInfo> {
        self.meta.get(name)
    }
}

impl Role for Snapshot {
    const TYPE: RoleType = RoleType::Snapshot;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `mirrors.json` role: an ordered list of mirror descriptors, signed so a compromised
/// mirror can't redirect clients to an attacker-controlled one without detection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "mirrors")]
pub struct Mirrors {
    /// The TUF spec version this document claims to follow.
    pub spec_version: String,
    /// The monotonically increasing version of this mirrors list.
    pub version: NonZeroU64,
    /// When this mirrors list expires.
    pub expires: DateTime<Utc>,
    /// The mirrors, in preference order.
    pub mirrors: Vec<MirrorDescriptor>,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

/// A single mirror entry in the `mirrors.json` role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MirrorDescriptor {
    /// The mirror's base URL.
    #[serde(rename = "urlBase")]
    pub url_base: Url,
    /// The content types this mirror is known to serve, if declared.
    #[serde(rename = "content-types", skip_serializing_if = "Option::is_none")]
    pub content_types: Option<Vec<String>>,
}

impl Role for Mirrors {
    const TYPE: RoleType = RoleType::Mirrors;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The `targets.json` role (and any delegated-targets role): a `FileMap` of target files plus
/// optional delegations of a path subset to another role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "_type")]
#[serde(rename = "targets")]
pub struct Targets {
    /// The TUF spec version this document claims to follow.
    pub spec_version: String,
    /// The monotonically increasing version of this targets role.
    pub version: NonZeroU64,
    /// When this targets role expires.
    pub expires: DateTime<Utc>,
    /// The target files this role vouches for directly.
    pub targets: FileMap,
    /// Delegations of other path subsets to other targets roles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegations: Option<Delegations>,
    /// Extra fields preserved for canonical round-tripping.
    #[serde(flatten)]
    #[serde(deserialize_with = "de::extra_skip_type")]
    pub _extra: HashMap<String, Value>,
}

impl Role for Targets {
    const TYPE: RoleType = RoleType::Targets;

    fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    fn version(&self) -> NonZeroU64 {
        self.version
    }
}

/// The `delegations` section of a `Targets` role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Delegations {
    /// Keys usable by the delegated roles below.
    #[serde(deserialize_with = "de::deserialize_keys")]
    pub keys: HashMap<KeyId, Key>,
    /// The delegated roles, searched in declared (preorder) order.
    pub roles: Vec<DelegatedRole>,
}

/// A single delegated targets role.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DelegatedRole {
    /// The delegated role's name (also its metadata filename, sans `.json`).
    pub name: String,
    /// The key IDs authorized for this delegated role.
    pub keyids: Vec<KeyId>,
    /// The signature threshold for this delegated role.
    pub threshold: NonZeroU64,
    /// The path patterns this role is trusted to provide targets for.
    pub paths: Vec<Pattern>,
    /// If `true` and no pattern here matches, the delegation chain stops (no further roles are
    /// consulted for this path) rather than falling through to a sibling delegation.
    pub terminating: bool,
}

impl DelegatedRole {
    /// This role's key IDs and threshold, in `RoleKeys` form, for use with the verification
    /// pipeline.
    pub fn role_keys(&self) -> RoleKeys {
        RoleKeys {
            keyids: self.keyids.clone(),
            threshold: self.threshold,
            _extra: HashMap::new(),
        }
    }

    /// Returns `true` if any of this role's patterns match `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p.is_match(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_info_matches_requires_equal_length_and_shared_digest() {
        let a = FileInfo::new(10, vec![1, 2, 3]);
        let b = FileInfo::new(10, vec![1, 2, 3]);
        let c = FileInfo::new(10, vec![9, 9, 9]);
        let d = FileInfo::new(11, vec![1, 2, 3]);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&d));
    }

    #[test]
    fn root_type_tag_is_lowercase() {
        let value = json!({"_type": "root"});
        assert_eq!(
            serde_json::to_value(RoleType::Root).unwrap(),
            json!("root")
        );
        let _ = value;
    }

    #[test]
    fn delegated_role_matches_respects_pattern_list() {
        let role = DelegatedRole {
            name: "projects".to_owned(),
            keyids: vec![],
            threshold: NonZeroU64::new(1).unwrap(),
            paths: vec![Pattern::parse("projects/**").unwrap()],
            terminating: false,
        };
        assert!(role.matches("projects/foo/foo.cabal"));
        assert!(!role.matches("other/foo.cabal"));
    }
}
