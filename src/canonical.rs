// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical JSON encoding. Used to produce the deterministic byte string that signatures are
//! computed over. The encoder itself (sorted keys, minimal escaping, no floats) is delegated to
//! [`olpc_cjson`]; this module just pins down how we invoke it for role payloads.

use crate::error;
use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use snafu::ResultExt;

/// Serializes `value` to its canonical JSON byte form.
pub fn to_canonical_vec<T: Serialize>(value: &T) -> error::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value
        .serialize(&mut ser)
        .context(error::JsonSerializationSnafu { what: "role" })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_drops_whitespace() {
        let value = json!({"b": 1, "a": [1, 2, 3], "c": "hi"});
        let canonical = to_canonical_vec(&value).unwrap();
        assert_eq!(
            String::from_utf8(canonical).unwrap(),
            r#"{"a":[1,2,3],"b":1,"c":"hi"}"#
        );
    }

    #[test]
    fn is_stable_across_reorderings() {
        let a = json!({"z": 1, "a": 2});
        let b = json!({"a": 2, "z": 1});
        assert_eq!(to_canonical_vec(&a).unwrap(), to_canonical_vec(&b).unwrap());
    }
}
