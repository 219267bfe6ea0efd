// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The verification pipeline: signature thresholds, version monotonicity, expiry, and
//! delegation resolution. Every function here is total over already-decoded documents; none of
//! them perform I/O. Callers (the repository layer, the client driver) fetch bytes and hand them
//! in as `Signed<T>` values already parsed from JSON.

use crate::cache::INDEX_FILE_NAME;
use crate::error::{self, Result};
use crate::keys::KeyEnv;
use crate::schema::{DelegatedRole, FileInfo, Role, RoleKeys, RoleType, Signed, Targets};
use crate::trust::Trusted;
use chrono::{DateTime, Utc};
use snafu::ensure;
use std::collections::HashSet;

/// Counts the number of valid, distinct-KeyId signatures `env` carries under `role_keys` and
/// `key_env`. A signature naming a key ID absent from `key_env`, or one not authorized for this
/// role, is logged and skipped rather than treated as fatal — only the final threshold check can
/// fail the operation.
fn count_valid_signatures<T: Role>(
    canonical: &[u8],
    env: &Signed<T>,
    role_keys: &RoleKeys,
    key_env: &KeyEnv,
) -> u64 {
    let authorized: HashSet<_> = role_keys.keyids.iter().collect();
    let mut seen = HashSet::new();
    let mut valid = 0u64;
    for signature in &env.signatures {
        if !seen.insert(signature.keyid.clone()) {
            continue;
        }
        if !authorized.contains(&signature.keyid) {
            continue;
        }
        let Some(key) = key_env.get(&signature.keyid) else {
            log::warn!("signature references unknown key id '{}'", signature.keyid);
            continue;
        };
        if signature.method != "ed25519" {
            continue;
        }
        match key.verify(canonical, signature.sig.as_bytes()) {
            Ok(()) => valid += 1,
            Err(()) => log::warn!("signature from key '{}' did not verify", signature.keyid),
        }
    }
    valid
}

/// Verifies `env` satisfies `role_keys`'s signature threshold under `key_env`, and returns its
/// payload wrapped as trusted. Does not check expiry or version; callers layer those on since the
/// "previous version" and "now" inputs differ per role.
pub fn verify_envelope<T: Role>(
    role_keys: &RoleKeys,
    key_env: &KeyEnv,
    env: Signed<T>,
) -> Result<Trusted<T>> {
    let canonical = env.signed.canonical_form()?;
    let got = count_valid_signatures(&canonical, &env, role_keys, key_env);
    let need = role_keys.threshold.get();
    ensure!(
        got >= need,
        error::SignatureThresholdNotMetSnafu {
            role: T::TYPE,
            need,
            got,
        }
    );
    Ok(Trusted::new(env.signed))
}

/// Fails unless `expires > now`.
pub fn check_not_expired(role: RoleType, expires: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    ensure!(expires > now, error::ExpiredSnafu { role, expires });
    Ok(())
}

/// Fails unless `got >= have` (or `have` is `None`, meaning no prior version is pinned yet).
pub fn check_not_rollback(role: RoleType, have: Option<u64>, got: u64) -> Result<()> {
    if let Some(have) = have {
        ensure!(got >= have, error::VersionRollbackSnafu { role, have, got });
    }
    Ok(())
}

/// Verifies a `FileInfo`-pinned document's raw bytes, length and SHA-256 first, before any
/// attempt is made to parse or verify its signatures. This is the order the spec requires:
/// untrusted bytes are checked against a trusted parent's record before they're even handed to a
/// JSON parser.
pub fn check_file_info(file: &str, declared: &FileInfo, length: u64, sha256: &[u8]) -> Result<()> {
    ensure!(
        declared.matches_actual(length, sha256),
        error::InvalidFileInfoSnafu {
            file: file.to_owned(),
            expected: format!(
                "length={}, sha256={}",
                declared.length,
                declared.sha256().map(ToString::to_string).unwrap_or_default()
            ),
            actual: format!("length={}, sha256={}", length, hex::encode(sha256)),
        }
    );
    Ok(())
}

/// Root update per the spec's chained-trust rule: `candidate` must verify under *both* the
/// currently trusted root's role-root threshold and its own declared role-root threshold
/// (cross-signing). Equal versions are only accepted when canonically byte-identical (a no-op
/// re-fetch, not a rollback).
pub fn verify_root_update(
    old: &Trusted<crate::schema::Root>,
    candidate: Signed<crate::schema::Root>,
    now: DateTime<Utc>,
) -> Result<Trusted<crate::schema::Root>> {
    let old_role_keys = old
        .role_keys(RoleType::Root)
        .cloned()
        .ok_or_else(|| error::Error::UnknownKey {
            keyid: "<root role undeclared in trusted root>".to_owned(),
        })?;
    let old_key_env = old.key_env()?;
    let new_role_keys = candidate
        .signed
        .role_keys(RoleType::Root)
        .cloned()
        .ok_or_else(|| error::Error::UnknownKey {
            keyid: "<root role undeclared in candidate root>".to_owned(),
        })?;
    let new_key_env = candidate.signed.key_env()?;

    let canonical = candidate.signed.canonical_form()?;
    let got_under_old = count_valid_signatures(&canonical, &candidate, &old_role_keys, &old_key_env);
    ensure!(
        got_under_old >= old_role_keys.threshold.get(),
        error::SignatureThresholdNotMetSnafu {
            role: RoleType::Root,
            need: old_role_keys.threshold.get(),
            got: got_under_old,
        }
    );
    let got_under_new = count_valid_signatures(&canonical, &candidate, &new_role_keys, &new_key_env);
    ensure!(
        got_under_new >= new_role_keys.threshold.get(),
        error::SignatureThresholdNotMetSnafu {
            role: RoleType::Root,
            need: new_role_keys.threshold.get(),
            got: got_under_new,
        }
    );

    let old_version = old.version().get();
    let new_version = candidate.signed.version.get();
    if new_version == old_version {
        let old_canonical = old.canonical_form()?;
        ensure!(
            old_canonical == canonical,
            error::VersionRollbackSnafu {
                role: RoleType::Root,
                have: old_version,
                got: new_version,
            }
        );
    } else {
        ensure!(
            new_version > old_version,
            error::VersionRollbackSnafu {
                role: RoleType::Root,
                have: old_version,
                got: new_version,
            }
        );
    }

    check_not_expired(RoleType::Root, candidate.signed.expires, now)?;
    Ok(Trusted::new(candidate.signed))
}

/// `true` if `new`'s key IDs or threshold for `role` differ from `old`'s — the trigger for
/// invalidating cached timestamp/snapshot after a root rotation.
pub fn role_keys_changed(old: &crate::schema::Root, new: &crate::schema::Root, role: RoleType) -> bool {
    match (old.role_keys(role), new.role_keys(role)) {
        (Some(a), Some(b)) => {
            a.threshold != b.threshold || {
                let mut a_ids: Vec<_> = a.keyids.iter().collect();
                let mut b_ids: Vec<_> = b.keyids.iter().collect();
                a_ids.sort();
                b_ids.sort();
                a_ids != b_ids
            }
        }
        (None, None) => false,
        _ => true,
    }
}

/// Verifies a fetched timestamp document against the trusted root and the previously trusted
/// timestamp (if any).
pub fn verify_timestamp(
    root: &Trusted<crate::schema::Root>,
    previous: Option<&Trusted<crate::schema::Timestamp>>,
    env: Signed<crate::schema::Timestamp>,
    now: DateTime<Utc>,
) -> Result<Trusted<crate::schema::Timestamp>> {
    let role_keys = root
        .role_keys(RoleType::Timestamp)
        .cloned()
        .unwrap_or(RoleKeys {
            keyids: Vec::new(),
            threshold: std::num::NonZeroU64::new(1).unwrap(),
            _extra: Default::default(),
        });
    let key_env = root.key_env()?;
    let trusted = verify_envelope(&role_keys, &key_env, env)?;
    check_not_expired(RoleType::Timestamp, trusted.expires(), now)?;
    check_not_rollback(
        RoleType::Timestamp,
        previous.map(|p| p.version().get()),
        trusted.version().get(),
    )?;
    ensure!(
        trusted.snapshot_file_info().is_some(),
        error::MissingFileMapEntrySnafu {
            role: RoleType::Timestamp,
            entry: "snapshot.json".to_owned(),
        }
    );
    Ok(trusted)
}

/// Verifies a fetched snapshot document (whose raw bytes must already have passed
/// [`check_file_info`] against the trusted timestamp's record) against the trusted root and the
/// previously trusted snapshot, if any.
pub fn verify_snapshot(
    root: &Trusted<crate::schema::Root>,
    previous: Option<&Trusted<crate::schema::Snapshot>>,
    env: Signed<crate::schema::Snapshot>,
    now: DateTime<Utc>,
) -> Result<Trusted<crate::schema::Snapshot>> {
    let role_keys = root
        .role_keys(RoleType::Snapshot)
        .cloned()
        .unwrap_or(RoleKeys {
            keyids: Vec::new(),
            threshold: std::num::NonZeroU64::new(1).unwrap(),
            _extra: Default::default(),
        });
    let key_env = root.key_env()?;
    let trusted = verify_envelope(&role_keys, &key_env, env)?;
    check_not_expired(RoleType::Snapshot, trusted.expires(), now)?;
    check_not_rollback(
        RoleType::Snapshot,
        previous.map(|p| p.version().get()),
        trusted.version().get(),
    )?;
    ensure!(
        trusted.root_file_info().is_some(),
        error::MissingFileMapEntrySnafu {
            role: RoleType::Snapshot,
            entry: "root.json".to_owned(),
        }
    );
    ensure!(
        trusted.mirrors_file_info().is_some(),
        error::MissingFileMapEntrySnafu {
            role: RoleType::Snapshot,
            entry: "mirrors.json".to_owned(),
        }
    );
    let gzip_index_name = format!("{INDEX_FILE_NAME}.gz");
    ensure!(
        trusted.index_file_info(INDEX_FILE_NAME).is_some()
            || trusted.index_file_info(&gzip_index_name).is_some(),
        error::MissingFileMapEntrySnafu {
            role: RoleType::Snapshot,
            entry: format!("{INDEX_FILE_NAME} or {gzip_index_name}"),
        }
    );
    Ok(trusted)
}

/// Verifies a fetched mirrors document against the trusted root.
pub fn verify_mirrors(
    root: &Trusted<crate::schema::Root>,
    previous: Option<&Trusted<crate::schema::Mirrors>>,
    env: Signed<crate::schema::Mirrors>,
    now: DateTime<Utc>,
) -> Result<Trusted<crate::schema::Mirrors>> {
    let role_keys = root
        .role_keys(RoleType::Mirrors)
        .cloned()
        .unwrap_or(RoleKeys {
            keyids: Vec::new(),
            threshold: std::num::NonZeroU64::new(1).unwrap(),
            _extra: Default::default(),
        });
    let key_env = root.key_env()?;
    let trusted = verify_envelope(&role_keys, &key_env, env)?;
    check_not_expired(RoleType::Mirrors, trusted.expires(), now)?;
    check_not_rollback(
        RoleType::Mirrors,
        previous.map(|p| p.version().get()),
        trusted.version().get(),
    )?;
    Ok(trusted)
}

/// Verifies the top-level targets role, pinned by the trusted snapshot's `FileInfo`.
pub fn verify_top_level_targets(
    root: &Trusted<crate::schema::Root>,
    previous: Option<&Trusted<Targets>>,
    env: Signed<Targets>,
    now: DateTime<Utc>,
) -> Result<Trusted<Targets>> {
    let role_keys = root
        .role_keys(RoleType::Targets)
        .cloned()
        .unwrap_or(RoleKeys {
            keyids: Vec::new(),
            threshold: std::num::NonZeroU64::new(1).unwrap(),
            _extra: Default::default(),
        });
    let key_env = root.key_env()?;
    let trusted = verify_envelope(&role_keys, &key_env, env)?;
    check_not_expired(RoleType::Targets, trusted.expires(), now)?;
    check_not_rollback(
        RoleType::Targets,
        previous.map(|p| p.version().get()),
        trusted.version().get(),
    )?;
    Ok(trusted)
}

/// Everything needed to verify and descend into a single delegated role, supplied by the caller
/// who has already fetched its bytes from the repository.
#[derive(Debug)]
pub struct DelegatedFetch {
    /// The role's authorized keys and threshold.
    pub role_keys: RoleKeys,
    /// The key environment those key IDs resolve in (the parent's `delegations.keys`).
    pub key_env: KeyEnv,
    /// The parsed, not-yet-verified envelope.
    pub env: Signed<Targets>,
}

/// Resolves `path` against `targets`, descending into delegations in declared order. `fetch`
/// is invoked once per delegation whose pattern matches `path`, to obtain the already-downloaded
/// envelope for that role; this function does no I/O itself.
pub fn resolve_target<F>(
    targets: &Targets,
    path: &str,
    now: DateTime<Utc>,
    fetch: &mut F,
) -> Result<FileInfo>
where
    F: FnMut(&DelegatedRole) -> Result<DelegatedFetch>,
{
    if let Some(info) = targets.targets.get(path) {
        return Ok(info.clone());
    }
    let Some(delegations) = &targets.delegations else {
        return error::DelegationUnresolvedSnafu {
            path: path.to_owned(),
        }
        .fail();
    };
    for role in &delegations.roles {
        if !role.matches(path) {
            continue;
        }
        let resolved = (|| -> Result<FileInfo> {
            let delegated = fetch(role)?;
            let trusted = verify_envelope(&delegated.role_keys, &delegated.key_env, delegated.env)?;
            check_not_expired(RoleType::Targets, trusted.expires(), now)?;
            resolve_target(&trusted, path, now, fetch)
        })();
        match resolved {
            Ok(info) => return Ok(info),
            Err(e) => {
                if role.terminating {
                    return Err(e);
                }
                continue;
            }
        }
    }
    error::DelegationUnresolvedSnafu {
        path: path.to_owned(),
    }
    .fail()
}
