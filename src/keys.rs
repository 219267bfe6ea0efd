// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ed25519 public keys and the key environment they're looked up in.
//!
//! A [`KeyId`] is the lowercase hex SHA-256 digest of the canonical JSON encoding of the public
//! key it names. [`KeyEnv`] folds the `keys` records encountered while parsing roles into a
//! single KeyId-to-Key map, hard-erroring if the same KeyId is ever bound to two different keys.

use crate::canonical::to_canonical_vec;
use crate::decoded::{Decoded, Hex};
use crate::error::{self, Result};
use ring::digest::{digest, SHA256};
use ring::signature::{self, UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt};
use std::collections::HashMap;

/// A key ID: the lowercase hex SHA-256 digest of a key's canonical JSON encoding.
pub type KeyId = Decoded<Hex>;

/// An Ed25519 public key, as it appears in a role's `keys` map.
///
/// Only the `ed25519` key type is supported; this matches the spec's scope, which names Ed25519
/// as the only signature scheme in play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// The key type. Always `"ed25519"`.
    pub keytype: String,
    /// The signature scheme. Always `"ed25519"`.
    pub scheme: String,
    /// The key material.
    pub keyval: KeyVal,
}

/// The key material carried inside a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    /// The hex-encoded public key bytes.
    pub public: Decoded<Hex>,
}

impl Key {
    /// Creates a new Ed25519 `Key` from raw public key bytes.
    pub fn new_ed25519(public: Vec<u8>) -> Self {
        Self {
            keytype: "ed25519".to_owned(),
            scheme: "ed25519".to_owned(),
            keyval: KeyVal {
                public: public.into(),
            },
        }
    }

    /// Computes this key's ID: the hex SHA-256 of its canonical JSON encoding.
    pub fn key_id(&self) -> Result<KeyId> {
        let canonical = to_canonical_vec(self)?;
        Ok(digest(&SHA256, &canonical).as_ref().to_vec().into())
    }

    /// Verifies `signature` over `message` under this key.
    ///
    /// Returns `Ok(())` on a valid signature, `Err` otherwise. A rejected signature is not
    /// treated as a crash-worthy condition by callers; it simply fails to contribute toward a
    /// role's signature threshold.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> std::result::Result<(), ()> {
        if self.keytype != "ed25519" || self.scheme != "ed25519" {
            return Err(());
        }
        let public_key = UnparsedPublicKey::new(&ED25519, self.keyval.public.as_bytes());
        public_key.verify(message, signature).map_err(|_| ())
    }
}

/// A closed mapping from [`KeyId`] to [`Key`], folded from the `keys` records of every role
/// encountered while parsing a repository's metadata.
#[derive(Debug, Clone, Default)]
pub struct KeyEnv {
    keys: HashMap<KeyId, Key>,
}

impl KeyEnv {
    /// Creates an empty key environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `keys` into this environment. Fails if a KeyId is already present with a
    /// *different* key; re-inserting the same key under the same KeyId is a no-op.
    pub fn extend(&mut self, keys: &HashMap<KeyId, Key>) -> Result<()> {
        for (keyid, key) in keys {
            match self.keys.get(keyid) {
                Some(existing) => ensure!(
                    existing == key,
                    error::DuplicateKeyIdSnafu {
                        keyid: keyid.to_string(),
                    }
                ),
                None => {
                    self.keys.insert(keyid.clone(), key.clone());
                }
            }
        }
        Ok(())
    }

    /// Looks up a key by its ID. Returns `None` on a miss; callers treat this as a verification
    /// failure, not a crash.
    pub fn get(&self, keyid: &KeyId) -> Option<&Key> {
        self.keys.get(keyid)
    }

    /// Returns the number of keys in the environment.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if the environment has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Validates that `keyid` is the correct KeyId for `key`. Used while deserializing role `keys`
/// maps, where the wire format insists the declared KeyId and computed KeyId agree.
pub(crate) fn validate_key_id(keyid: &KeyId, key: &Key) -> Result<()> {
    let calculated = key.key_id()?;
    ensure!(
        *keyid == calculated,
        error::InvalidKeyIdSnafu {
            keyid: keyid.to_string(),
            calculated: calculated.to_string(),
        }
    );
    Ok(())
}

/// Parses a raw Ed25519 keypair's public half into a [`signature::Ed25519KeyPair`]-compatible
/// public key check. Exposed for tests that need to construct signatures without shipping a
/// real signing key source (signing is out of scope for this crate).
#[cfg(test)]
pub(crate) fn sign_for_test(
    keypair: &ring::signature::Ed25519KeyPair,
    message: &[u8],
) -> Vec<u8> {
    use ring::signature::KeyPair as _;
    let _ = keypair.public_key();
    signature::Ed25519KeyPair::sign(keypair, message).as_ref().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::{Ed25519KeyPair, KeyPair};

    fn keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    #[test]
    fn key_id_is_deterministic() {
        let kp = keypair();
        let key = Key::new_ed25519(kp.public_key().as_ref().to_vec());
        assert_eq!(key.key_id().unwrap(), key.key_id().unwrap());
    }

    #[test]
    fn verify_accepts_valid_and_rejects_tampered() {
        let kp = keypair();
        let key = Key::new_ed25519(kp.public_key().as_ref().to_vec());
        let message = b"canonical bytes";
        let sig = sign_for_test(&kp, message);
        assert!(key.verify(message, &sig).is_ok());
        assert!(key.verify(b"different bytes", &sig).is_err());
    }

    #[test]
    fn key_env_rejects_conflicting_rebind() {
        let kp1 = keypair();
        let kp2 = keypair();
        let key1 = Key::new_ed25519(kp1.public_key().as_ref().to_vec());
        let key2 = Key::new_ed25519(kp2.public_key().as_ref().to_vec());
        let keyid = key1.key_id().unwrap();

        let mut env = KeyEnv::new();
        let mut first = HashMap::new();
        first.insert(keyid.clone(), key1);
        env.extend(&first).unwrap();

        let mut second = HashMap::new();
        second.insert(keyid, key2);
        assert!(env.extend(&second).is_err());
    }
}
