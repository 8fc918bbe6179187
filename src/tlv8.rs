//! TLV8 (tag/length/value) codec used during Pair-Setup and Pair-Verify.
//!
//! Each item is `tag:u8, len:u8, value:[len]bytes`. Values over 255 bytes are
//! split into consecutive same-tag chunks; only the final chunk of a run may
//! be shorter than 255 bytes, which is how a decoder recognises the
//! boundary. Encoding never exposes this fragmentation to callers: a value
//! given to [`TlvWriter::push`] comes back whole from [`TlvReader::get`].

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Tlv8Error {
    #[error("buffer truncated: header present without enough body")]
    Truncated,
    #[error("required tag 0x{0:02x} missing")]
    MissingTag(u8),
    #[error("tag 0x{0:02x} has unexpected length {1}")]
    UnexpectedLength(u8, usize),
}

/// Builds a TLV8 byte buffer.
///
/// Items are kept in insertion order internally but [`TlvWriter::finish`]
/// emits them sorted by ascending tag, per the wire format's requirement.
#[derive(Debug, Default)]
pub struct TlvWriter {
    items: BTreeMap<u8, Vec<u8>>,
}

impl TlvWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the value for `tag`.
    #[must_use]
    pub fn push(mut self, tag: u8, value: impl Into<Vec<u8>>) -> Self {
        self.items.insert(tag, value.into());
        self
    }

    #[must_use]
    pub fn push_u8(self, tag: u8, value: u8) -> Self {
        self.push(tag, vec![value])
    }

    /// Serialise all items in ascending tag order, fragmenting any value
    /// longer than 255 bytes into consecutive 255-byte (or shorter, for the
    /// final chunk) same-tag entries.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::new();
        for (tag, value) in self.items {
            if value.is_empty() {
                out.push(tag);
                out.push(0);
                continue;
            }
            for chunk in value.chunks(255) {
                out.push(tag);
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        out
    }
}

/// Decoded view over a TLV8 buffer: same-tag runs are concatenated back into
/// a single value per tag.
#[derive(Debug, Default)]
pub struct TlvReader {
    items: BTreeMap<u8, Vec<u8>>,
}

impl TlvReader {
    /// Decode `data`. Truncated trailing input (a header without enough
    /// body bytes) ends decoding silently and returns everything assembled
    /// so far; a missing mandatory tag is the caller's problem to detect via
    /// [`TlvReader::require`].
    pub fn decode(data: &[u8]) -> Self {
        let mut items: BTreeMap<u8, Vec<u8>> = BTreeMap::new();
        let mut pos = 0;
        while pos + 2 <= data.len() {
            let tag = data[pos];
            let len = data[pos + 1] as usize;
            pos += 2;
            if pos + len > data.len() {
                break;
            }
            items.entry(tag).or_default().extend_from_slice(&data[pos..pos + len]);
            pos += len;
        }
        Self { items }
    }

    #[must_use]
    pub fn get(&self, tag: u8) -> Option<&[u8]> {
        self.items.get(&tag).map(Vec::as_slice)
    }

    pub fn require(&self, tag: u8) -> Result<&[u8], Tlv8Error> {
        self.get(tag).ok_or(Tlv8Error::MissingTag(tag))
    }

    pub fn require_u8(&self, tag: u8) -> Result<u8, Tlv8Error> {
        let value = self.require(tag)?;
        if value.len() != 1 {
            return Err(Tlv8Error::UnexpectedLength(tag, value.len()));
        }
        Ok(value[0])
    }

    #[must_use]
    pub fn get_u8(&self, tag: u8) -> Option<u8> {
        self.get(tag).and_then(|v| v.first().copied())
    }
}

/// Well-known tags shared by Pair-Setup and Pair-Verify TLV payloads.
pub mod tags {
    pub const METHOD: u8 = 0x00;
    pub const IDENTIFIER: u8 = 0x01;
    pub const SALT: u8 = 0x02;
    pub const PUBLIC_KEY: u8 = 0x03;
    pub const PROOF: u8 = 0x04;
    pub const ENCRYPTED_DATA: u8 = 0x05;
    pub const STATE: u8 = 0x06;
    pub const ERROR: u8 = 0x07;
    pub const RETRY_DELAY: u8 = 0x08;
    pub const SIGNATURE: u8 = 0x0A;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scenario_s2_fragmentation() {
        let value = vec![0xABu8; 400];
        let encoded = TlvWriter::new().push(0x03, value.clone()).finish();
        assert_eq!(&encoded[0..2], &[0x03, 0xFF]);
        assert_eq!(encoded.len(), 2 + 255 + 2 + 145);
        assert_eq!(encoded[2 + 255], 0x03);
        assert_eq!(encoded[2 + 255 + 1], 145);

        let decoded = TlvReader::decode(&encoded);
        assert_eq!(decoded.get(0x03).unwrap(), value.as_slice());
    }

    #[test]
    fn truncated_input_yields_partial_decode() {
        let mut buf = TlvWriter::new().push_u8(tags::STATE, 1).finish();
        buf.push(tags::ERROR); // header with no length/body byte
        let decoded = TlvReader::decode(&buf);
        assert_eq!(decoded.get_u8(tags::STATE), Some(1));
        assert!(decoded.get(tags::ERROR).is_none());
    }

    proptest! {
        #[test]
        fn round_trip(pairs in proptest::collection::vec((any::<u8>(), proptest::collection::vec(any::<u8>(), 0..2048)), 0..8)) {
            let mut expected: std::collections::BTreeMap<u8, Vec<u8>> = std::collections::BTreeMap::new();
            let mut writer = TlvWriter::new();
            for (tag, value) in pairs {
                expected.insert(tag, value.clone());
                writer = writer.push(tag, value);
            }
            let encoded = writer.finish();
            let decoded = TlvReader::decode(&encoded);
            for (tag, value) in &expected {
                prop_assert_eq!(decoded.get(*tag), Some(value.as_slice()));
            }
        }
    }
}
