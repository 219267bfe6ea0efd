// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Custom deserializers shared across role document types.

use crate::keys::{validate_key_id, Key, KeyId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Deserializes a role's `keys` map, validating that each declared key ID matches the hash of
/// its own key material and that no key ID appears twice with conflicting contents.
pub(super) fn deserialize_keys<'de, D>(deserializer: D) -> Result<HashMap<KeyId, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;

    impl<'de> serde::de::Visitor<'de> for Visitor {
        type Value = HashMap<KeyId, Key>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a map of key id to key")
        }

        fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
        where
            M: serde::de::MapAccess<'de>,
        {
            let mut map = HashMap::new();
            while let Some((keyid, key)) = access.next_entry::<KeyId, Key>()? {
                validate_key_id(&keyid, &key).map_err(M::Error::custom)?;
                if let Some(existing) = map.insert(keyid.clone(), key.clone()) {
                    if existing != key {
                        return Err(M::Error::custom(format!(
                            "duplicate key id '{keyid}' with conflicting key material"
                        )));
                    }
                }
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(Visitor)
}

/// Deserializes the `#[serde(flatten)]` catch-all field on a tagged role payload, discarding the
/// `_type` tag itself so it isn't duplicated between the typed field and the catch-all map.
pub(super) fn extra_skip_type<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut map = HashMap::<String, Value>::deserialize(deserializer)?;
    map.remove("_type");
    Ok(map)
}
