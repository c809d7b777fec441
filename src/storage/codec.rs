// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Binary encoding of [`Value`]s for the durable store.
//!
//! Format: one tag byte followed by the payload.
//! - `Null`: no payload
//! - `Boolean`: one byte (0 or 1)
//! - `Long`: `i64` big-endian
//! - `Double`: IEEE-754 bits as `u64` big-endian
//! - `Text` / `Bytes`: `[len:u32 BE][bytes]`
//! - `Array`: `[count:u32 BE]` followed by `count` encoded values

use super::{StorageError, Value};

const TAG_NULL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_TEXT: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ARRAY: u8 = 6;

/// Maximum array nesting accepted when decoding.
const MAX_NESTING: usize = 64;

/// Appends the encoding of `value` to `out`.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(u8::from(*b));
        }
        Value::Long(v) => {
            out.push(TAG_LONG);
            out.extend_from_slice(&v.to_be_bytes());
        }
        Value::Double(v) => {
            out.push(TAG_DOUBLE);
            out.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(bytes) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Value::Array(values) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(values.len() as u32).to_be_bytes());
            for v in values {
                encode_value(v, out);
            }
        }
    }
}

/// Encodes `value` into a fresh buffer.
pub fn value_to_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(value, &mut out);
    out
}

/// Decodes a single value that must span the whole buffer.
pub fn decode_value(bytes: &[u8]) -> Result<Value, StorageError> {
    let mut reader = Reader { buf: bytes, pos: 0 };
    let value = reader.value(0)?;
    if reader.pos != bytes.len() {
        return Err(StorageError::InvalidValueEncoding(format!(
            "{} trailing bytes",
            bytes.len() - reader.pos
        )));
    }
    Ok(value)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                StorageError::InvalidValueEncoding(format!(
                    "need {} bytes at offset {}, have {}",
                    n,
                    self.pos,
                    self.buf.len() - self.pos
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, StorageError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, StorageError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn value(&mut self, depth: usize) -> Result<Value, StorageError> {
        if depth > MAX_NESTING {
            return Err(StorageError::InvalidValueEncoding(
                "array nesting too deep".to_string(),
            ));
        }
        match self.u8()? {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOLEAN => match self.u8()? {
                0 => Ok(Value::Boolean(false)),
                1 => Ok(Value::Boolean(true)),
                other => Err(StorageError::InvalidValueEncoding(format!(
                    "invalid boolean byte {other}"
                ))),
            },
            TAG_LONG => Ok(Value::Long(self.u64()? as i64)),
            TAG_DOUBLE => Ok(Value::Double(f64::from_bits(self.u64()?))),
            TAG_TEXT => {
                let len = self.u32()? as usize;
                let bytes = self.take(len)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|e| StorageError::InvalidValueEncoding(e.to_string()))?;
                Ok(Value::Text(s.to_string()))
            }
            TAG_BYTES => {
                let len = self.u32()? as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_ARRAY => {
                let count = self.u32()? as usize;
                // Every element needs at least its tag byte.
                let mut values = Vec::with_capacity(count.min(self.buf.len() - self.pos));
                for _ in 0..count {
                    values.push(self.value(depth + 1)?);
                }
                Ok(Value::Array(values))
            }
            tag => Err(StorageError::InvalidValueEncoding(format!(
                "unknown tag {tag}"
            ))),
        }
    }
}
