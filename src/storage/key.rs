// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Map key encoding and decoding.
//!
//! Every map shares one RocksDB keyspace. Entries are keyed by
//! `[name_len:u32 BE][map name bytes][encoded key value]`, so all entries of a
//! map share the `[name_len][name]` prefix and no map name is a prefix of
//! another map's keys.

use super::codec::{decode_value, encode_value};
use super::{StorageError, Value};

/// Encodes a map entry key into a RocksDB key.
#[inline]
pub fn encode_map_key(map: &str, key: &Value) -> Vec<u8> {
    let mut encoded = map_prefix(map);
    encode_value(key, &mut encoded);
    encoded
}

/// Returns the prefix shared by every entry of `map`.
#[inline]
pub fn map_prefix(map: &str) -> Vec<u8> {
    let name = map.as_bytes();
    let mut prefix = Vec::with_capacity(4 + name.len() + 9);
    prefix.extend_from_slice(&(name.len() as u32).to_be_bytes());
    prefix.extend_from_slice(name);
    prefix
}

/// Extracts the map name from an encoded key without decoding the entry key.
#[inline]
pub fn extract_map_name(encoded: &[u8]) -> Result<&str, StorageError> {
    if encoded.len() < 4 {
        return Err(StorageError::InvalidKeyEncoding(
            "key too short for length prefix".to_string(),
        ));
    }

    let name_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]) as usize;

    if encoded.len() < 4 + name_len {
        return Err(StorageError::InvalidKeyEncoding(
            "key too short for map name".to_string(),
        ));
    }

    std::str::from_utf8(&encoded[4..4 + name_len])
        .map_err(|e| StorageError::InvalidKeyEncoding(e.to_string()))
}

/// Decodes a RocksDB key back into map name and entry key.
pub fn decode_map_key(encoded: &[u8]) -> Result<(String, Value), StorageError> {
    let name = extract_map_name(encoded)?;
    let key_bytes = &encoded[4 + name.len()..];
    if key_bytes.is_empty() {
        return Err(StorageError::InvalidKeyEncoding(format!(
            "missing entry key for map {name}"
        )));
    }

    let key = decode_value(key_bytes)
        .map_err(|e| StorageError::InvalidKeyEncoding(e.to_string()))?;
    Ok((name.to_string(), key))
}
