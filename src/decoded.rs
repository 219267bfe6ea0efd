// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A wrapper type for byte strings that are hex-encoded on the wire, the way key IDs, signatures,
//! and digests appear in TUF metadata.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

/// An encoding scheme understood by [`Decoded`]. Only [`Hex`] is used by this crate, but the
/// indirection keeps the wire representation out of `Decoded`'s own logic.
pub trait Encoding {
    /// Decodes `s` into raw bytes.
    fn decode(s: &str) -> Result<Vec<u8>, String>;
    /// Encodes `bytes` into the wire representation.
    fn encode(bytes: &[u8]) -> String;
}

/// Lowercase hexadecimal encoding, as used for key IDs, signatures, and file digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hex {}

impl Encoding for Hex {
    fn decode(s: &str) -> Result<Vec<u8>, String> {
        hex::decode(s).map_err(|e| e.to_string())
    }

    fn encode(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }
}

/// A byte string that serializes to and deserializes from its `E`-encoded wire form.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Decoded<E: Encoding> {
    bytes: Vec<u8>,
    spooky: PhantomData<E>,
}

impl<E: Encoding> Decoded<E> {
    /// Returns the raw, decoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes `self`, returning the raw, decoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl<E: Encoding> From<Vec<u8>> for Decoded<E> {
    fn from(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            spooky: PhantomData,
        }
    }
}

impl<E: Encoding> Deref for Decoded<E> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.bytes
    }
}

impl<E: Encoding> Borrow<[u8]> for Decoded<E> {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E: Encoding> AsRef<[u8]> for Decoded<E> {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl<E: Encoding> fmt::Debug for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Decoded").field(&E::encode(&self.bytes)).finish()
    }
}

impl<E: Encoding> fmt::Display for Decoded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&E::encode(&self.bytes))
    }
}

impl<E: Encoding> Serialize for Decoded<E> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&E::encode(&self.bytes))
    }
}

impl<'de, E: Encoding> Deserialize<'de> for Decoded<E> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = E::decode(&s).map_err(D::Error::custom)?;
        Ok(Self {
            bytes,
            spooky: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trips() {
        let decoded: Decoded<Hex> = vec![0xde, 0xad, 0xbe, 0xef].into();
        assert_eq!(decoded.to_string(), "deadbeef");
        let json = serde_json::to_string(&decoded).unwrap();
        assert_eq!(json, "\"deadbeef\"");
        let back: Decoded<Hex> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, decoded);
    }

    #[test]
    fn hex_rejects_garbage() {
        let err = serde_json::from_str::<Decoded<Hex>>("\"not hex!\"");
        assert!(err.is_err());
    }
}
