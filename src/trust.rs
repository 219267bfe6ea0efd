// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Trusted<T>` wrapper and the `TrustState` machine that tracks what a client currently
//! believes about a repository.
//!
//! `Trusted<T>` can only be constructed by [`crate::verify`]; every other module only ever
//! receives one, never builds one itself. This is enforced with visibility alone: the
//! constructor is `pub(crate)` and used exactly once, in `verify::verify_envelope`.

use crate::schema::{Mirrors, Root, Snapshot, Timestamp};
use std::ops::Deref;

/// A value that has passed verification under some role's signature threshold, version
/// monotonicity check, and expiry check.
///
/// Downgrading a `Trusted<T>` to a plain `&T` is always explicit, via [`Trusted::get`] or the
/// `Deref` impl below — there is no way to produce one except through the verifier.
#[derive(Debug, Clone)]
pub struct Trusted<T> {
    value: T,
}

impl<T> Trusted<T> {
    /// Wraps `value` as trusted. Only callable from within this crate, and only ever called from
    /// the verification pipeline.
    pub(crate) fn new(value: T) -> Self {
        Self { value }
    }

    /// Projects out the wrapped value.
    pub fn get(&self) -> &T {
        &self.value
    }

    /// Consumes the wrapper, returning the inner value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Trusted<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// The client's current belief about a repository's trusted state.
#[derive(Debug, Clone)]
pub enum TrustState {
    /// Only a trusted root is available; timestamp/snapshot/mirrors have not yet been verified
    /// under it (first run, or just after a root rotation invalidated them).
    Bootstrap {
        /// The trusted root.
        root: Trusted<Root>,
    },
    /// Root, timestamp, snapshot, and mirrors are all verified and unexpired.
    Fresh {
        /// The trusted root.
        root: Trusted<Root>,
        /// The trusted timestamp.
        timestamp: Trusted<Timestamp>,
        /// The trusted snapshot.
        snapshot: Trusted<Snapshot>,
        /// The trusted mirrors list, if one has ever been verified.
        mirrors: Option<Trusted<Mirrors>>,
    },
    /// A check-for-updates cycle is in progress; `previous` is restored on any verification
    /// error so a failed update never leaves the client worse off than before it started.
    Updating {
        /// The state to roll back to on failure.
        previous: Box<TrustState>,
    },
}

impl TrustState {
    /// Creates a fresh `Bootstrap` state from a caller-supplied trusted root (the out-of-band
    /// seed, or a cached root from a prior run).
    pub fn bootstrap(root: Trusted<Root>) -> Self {
        TrustState::Bootstrap { root }
    }

    /// The trusted root in any state.
    pub fn root(&self) -> &Trusted<Root> {
        match self {
            TrustState::Bootstrap { root } => root,
            TrustState::Fresh { root, .. } => root,
            TrustState::Updating { previous } => previous.root(),
        }
    }

    /// Begins a check-for-updates cycle, moving the current state aside so it can be restored on
    /// failure.
    pub fn begin_update(self) -> TrustState {
        TrustState::Updating {
            previous: Box::new(self),
        }
    }

    /// Completes a successful check-for-updates cycle, replacing `Updating` with the new `Fresh`
    /// state. Calling this outside `Updating` simply returns the new state, which is harmless but
    /// should not happen in practice.
    pub fn commit_update(
        self,
        root: Trusted<Root>,
        timestamp: Trusted<Timestamp>,
        snapshot: Trusted<Snapshot>,
        mirrors: Option<Trusted<Mirrors>>,
    ) -> TrustState {
        TrustState::Fresh {
            root,
            timestamp,
            snapshot,
            mirrors,
        }
    }

    /// Aborts a check-for-updates cycle, restoring the state from before it began. Outside
    /// `Updating`, returns `self` unchanged.
    pub fn abort_update(self) -> TrustState {
        match self {
            TrustState::Updating { previous } => *previous,
            other => other,
        }
    }

    /// Moves back to `Bootstrap` with a newly rotated root, discarding any timestamp/snapshot
    /// that were verified under the old root's delegated keys.
    pub fn invalidate_after_root_rotation(root: Trusted<Root>) -> TrustState {
        TrustState::Bootstrap { root }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RoleType;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;
    use std::num::NonZeroU64;

    fn sample_root() -> Root {
        Root {
            spec_version: "1.0".to_owned(),
            consistent_snapshot: true,
            version: NonZeroU64::new(1).unwrap(),
            expires: Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap(),
            keys: HashMap::new(),
            roles: HashMap::new(),
            _extra: HashMap::new(),
        }
    }

    #[test]
    fn begin_and_abort_restores_previous_state() {
        let root = Trusted::new(sample_root());
        let state = TrustState::bootstrap(root);
        let version_before = state.root().version;
        let updating = state.begin_update();
        let restored = updating.abort_update();
        assert_eq!(restored.root().version, version_before);
    }

    #[test]
    fn root_accessor_reaches_through_updating() {
        let root = Trusted::new(sample_root());
        let state = TrustState::bootstrap(root).begin_update();
        assert_eq!(state.root().version, NonZeroU64::new(1).unwrap());
        let _ = RoleType::Root;
    }
}
