//! OPACK codec: Apple's self-describing binary object-packing format used for
//! every Companion-link payload once the session is established.
//!
//! Every value starts with a single marker byte that both tags its type and,
//! for small forms, carries its length or magnitude inline. See the marker
//! table in [`Value::encode`] / [`decode_value`] for the full layout.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpackError {
    #[error("insufficient data to decode value")]
    InsufficientData,
    #[error("invalid utf-8 in string value")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("value has no OPACK encoding")]
    UnsupportedType,
    #[error("unsupported marker byte 0x{0:02x}")]
    UnsupportedMarker(u8),
    #[error("map keys must be strings")]
    NonStringKey,
}

/// A decoded (or to-be-encoded) OPACK value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Decoded-only in practice (marker `0x05`); this crate accepts it on
    /// encode too for symmetry, though nothing in the Companion protocol
    /// requires producing it.
    Uuid([u8; 16]),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn map(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
        Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Encode this value, appending to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), OpackError> {
        match self {
            Value::Null => out.push(0x04),
            Value::Bool(true) => out.push(0x01),
            Value::Bool(false) => out.push(0x02),
            Value::Uuid(bytes) => {
                out.push(0x05);
                out.extend_from_slice(bytes);
            }
            Value::Int(i) => encode_int(*i, out),
            Value::Float32(f) => {
                out.push(0x35);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Float64(f) => {
                out.push(0x36);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::String(s) => encode_len_tagged(s.as_bytes(), 0x40, 0x60, 0x61, out),
            Value::Bytes(b) => encode_bytes(b, out),
            Value::Array(items) => {
                if items.len() < 15 {
                    out.push(0xD0 + items.len() as u8);
                    for item in items {
                        item.encode(out)?;
                    }
                } else {
                    out.push(0xDF);
                    for item in items {
                        item.encode(out)?;
                    }
                    out.push(0x03);
                }
            }
            Value::Map(map) => {
                if map.len() < 15 {
                    out.push(0xE0 + map.len() as u8);
                    for (k, v) in map {
                        Value::String(k.clone()).encode(out)?;
                        v.encode(out)?;
                    }
                } else {
                    out.push(0xEF);
                    for (k, v) in map {
                        Value::String(k.clone()).encode(out)?;
                        v.encode(out)?;
                    }
                    out.push(0x03);
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // encode() only fails on non-string map keys, which the BTreeMap<String, _>
        // type already rules out.
        self.encode(&mut out).expect("Value tree is always encodable");
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, OpackError> {
        let (value, _rest) = decode_value(data)?;
        Ok(value)
    }
}

fn encode_int(i: i64, out: &mut Vec<u8>) {
    if (0..40).contains(&i) {
        out.push(0x08 + i as u8);
        return;
    }
    if i < 0 {
        out.push(0x33);
        out.extend_from_slice(&(i as u64).to_le_bytes());
        return;
    }
    let v = i as u64;
    if v <= u8::MAX as u64 {
        out.push(0x30);
        out.push(v as u8);
    } else if v <= u16::MAX as u64 {
        out.push(0x31);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v <= u32::MAX as u64 {
        out.push(0x32);
        out.extend_from_slice(&(v as u32).to_le_bytes());
    } else {
        out.push(0x33);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_len_tagged(bytes: &[u8], short_base: u8, short_max: u8, long_base: u8, out: &mut Vec<u8>) {
    let max_short = (short_max - short_base) as usize;
    if bytes.len() <= max_short {
        out.push(short_base + bytes.len() as u8);
        out.extend_from_slice(bytes);
        return;
    }
    let len = bytes.len();
    if len <= u8::MAX as usize {
        out.push(long_base);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(long_base + 1);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    } else if len <= 0x00FF_FFFF {
        out.push(long_base + 2);
        out.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
    } else {
        out.push(long_base + 3);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(bytes);
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    if bytes.len() <= 32 {
        out.push(0x70 + bytes.len() as u8);
        out.extend_from_slice(bytes);
        return;
    }
    let len = bytes.len();
    let (marker, field_bytes) = if len <= u8::MAX as usize {
        (0x91u8, 1usize)
    } else if len <= u16::MAX as usize {
        (0x92, 2)
    } else if len <= u32::MAX as usize {
        (0x93, 4)
    } else {
        (0x94, 8)
    };
    out.push(marker);
    let len_bytes = (len as u64).to_le_bytes();
    out.extend_from_slice(&len_bytes[..field_bytes]);
    out.extend_from_slice(bytes);
}

fn decode_value(data: &[u8]) -> Result<(Value, &[u8]), OpackError> {
    let (&marker, rest) = data.split_first().ok_or(OpackError::InsufficientData)?;
    match marker {
        0x01 => Ok((Value::Bool(true), rest)),
        0x02 => Ok((Value::Bool(false), rest)),
        0x04 => Ok((Value::Null, rest)),
        0x05 => {
            if rest.len() < 16 {
                return Err(OpackError::InsufficientData);
            }
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&rest[..16]);
            Ok((Value::Uuid(bytes), &rest[16..]))
        }
        0x08..=0x2F => Ok((Value::Int((marker - 0x08) as i64), rest)),
        0x30..=0x33 => {
            let n = 1usize << (marker - 0x30);
            if rest.len() < n {
                return Err(OpackError::InsufficientData);
            }
            let mut buf = [0u8; 8];
            buf[..n].copy_from_slice(&rest[..n]);
            let value = if n == 8 {
                i64::from_le_bytes(buf)
            } else {
                u64::from_le_bytes(buf) as i64
            };
            Ok((Value::Int(value), &rest[n..]))
        }
        0x35 => {
            if rest.len() < 4 {
                return Err(OpackError::InsufficientData);
            }
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&rest[..4]);
            Ok((Value::Float32(f32::from_le_bytes(buf)), &rest[4..]))
        }
        0x36 => {
            if rest.len() < 8 {
                return Err(OpackError::InsufficientData);
            }
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&rest[..8]);
            Ok((Value::Float64(f64::from_le_bytes(buf)), &rest[8..]))
        }
        0x40..=0x60 => {
            let len = (marker - 0x40) as usize;
            take_string(rest, len)
        }
        0x61..=0x64 => {
            let field_bytes = (marker - 0x60) as usize;
            let (len, rest) = take_len(rest, field_bytes)?;
            take_string(rest, len)
        }
        0x70..=0x90 => {
            let len = (marker - 0x70) as usize;
            take_bytes(rest, len)
        }
        0x91..=0x94 => {
            let field_bytes = 1usize << ((marker & 0x0F) - 1);
            let (len, rest) = take_len(rest, field_bytes)?;
            take_bytes(rest, len)
        }
        0xD0..=0xDF => {
            let low = marker & 0x0F;
            let mut items = Vec::new();
            let mut cursor = rest;
            if low == 0x0F {
                loop {
                    if cursor.first() == Some(&0x03) {
                        cursor = &cursor[1..];
                        break;
                    }
                    let (item, next) = decode_value(cursor)?;
                    items.push(item);
                    cursor = next;
                }
            } else {
                for _ in 0..low {
                    let (item, next) = decode_value(cursor)?;
                    items.push(item);
                    cursor = next;
                }
            }
            Ok((Value::Array(items), cursor))
        }
        0xE0..=0xEF => {
            let low = marker & 0x0F;
            let mut map = BTreeMap::new();
            let mut cursor = rest;
            if low == 0x0F {
                loop {
                    if cursor.first() == Some(&0x03) {
                        cursor = &cursor[1..];
                        break;
                    }
                    let (key, next) = decode_value(cursor)?;
                    let (value, next) = decode_value(next)?;
                    let key = match key {
                        Value::String(s) => s,
                        _ => return Err(OpackError::NonStringKey),
                    };
                    map.insert(key, value);
                    cursor = next;
                }
            } else {
                for _ in 0..low {
                    let (key, next) = decode_value(cursor)?;
                    let (value, next) = decode_value(next)?;
                    let key = match key {
                        Value::String(s) => s,
                        _ => return Err(OpackError::NonStringKey),
                    };
                    map.insert(key, value);
                    cursor = next;
                }
            }
            Ok((Value::Map(map), cursor))
        }
        other => Err(OpackError::UnsupportedMarker(other)),
    }
}

fn take_len(data: &[u8], field_bytes: usize) -> Result<(usize, &[u8]), OpackError> {
    if data.len() < field_bytes {
        return Err(OpackError::InsufficientData);
    }
    let mut buf = [0u8; 8];
    buf[..field_bytes].copy_from_slice(&data[..field_bytes]);
    Ok((u64::from_le_bytes(buf) as usize, &data[field_bytes..]))
}

fn take_string(data: &[u8], len: usize) -> Result<(Value, &[u8]), OpackError> {
    if data.len() < len {
        return Err(OpackError::InsufficientData);
    }
    let s = String::from_utf8(data[..len].to_vec())?;
    Ok((Value::String(s), &data[len..]))
}

fn take_bytes(data: &[u8], len: usize) -> Result<(Value, &[u8]), OpackError> {
    if data.len() < len {
        return Err(OpackError::InsufficientData);
    }
    Ok((Value::Bytes(data[..len].to_vec()), &data[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_s1_short_string_round_trip() {
        let value = Value::map([("_t", Value::str("_sessionStart"))]);
        let encoded = value.to_bytes();
        assert_eq!(encoded[0], 0xE1);
        assert_eq!(&encoded[1..4], &[0x42, b'_', b't']);
        assert_eq!(encoded[4], 0x4D);
        assert_eq!(&encoded[5..18], b"_sessionStart");
        assert_eq!(Value::decode(&encoded).unwrap(), value);
    }

    #[test]
    fn small_int_uses_inline_form() {
        let encoded = Value::Int(6).to_bytes();
        assert_eq!(encoded, vec![0x08 + 6]);
    }

    #[test]
    fn large_string_uses_length_prefixed_form() {
        let s = "x".repeat(100);
        let value = Value::str(s.clone());
        let encoded = value.to_bytes();
        assert_eq!(encoded[0], 0x61);
        assert_eq!(encoded[1], 100);
        assert_eq!(Value::decode(&encoded).unwrap(), value);
    }

    #[test]
    fn unknown_marker_is_an_error() {
        let err = Value::decode(&[0xFE]).unwrap_err();
        assert!(matches!(err, OpackError::UnsupportedMarker(0xFE)));
    }

    #[test]
    fn endless_array_round_trips() {
        let items: Vec<Value> = (0..20).map(Value::Int).collect();
        let value = Value::Array(items);
        let encoded = value.to_bytes();
        assert_eq!(encoded[0], 0xDF);
        assert_eq!(*encoded.last().unwrap(), 0x03);
        assert_eq!(Value::decode(&encoded).unwrap(), value);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|i| Value::Int(i as i64)),
            "[a-zA-Z0-9_]{0,40}".prop_map(Value::str),
            proptest::collection::vec(any::<u8>(), 0..40).prop_map(Value::Bytes),
        ];
        leaf.prop_recursive(3, 32, 5, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                proptest::collection::btree_map("[a-z]{1,8}", inner, 0..5).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn round_trip(value in arb_value()) {
            let encoded = value.to_bytes();
            let decoded = Value::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, value);
        }
    }
}
