//! Companion wire framing (component C5): `length:u32-be` (bytes following),
//! `type:u8`, `flags:u8`, `payload:[length-2]bytes`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unknown frame type 0x{0:02x}")]
    UnknownFrameType(u8),
    #[error("frame declares {declared} bytes but only {buffered} are buffered")]
    InsufficientData { declared: usize, buffered: usize },
}

/// Largest total frame size (length prefix included) this crate will ever
/// buffer toward. A peer declaring more than this is rejected immediately
/// rather than trusted to eventually complete the frame.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    PsStart = 0x01,
    PsNext = 0x02,
    PvStart = 0x03,
    PvNext = 0x04,
    Event = 0x06,
}

impl FrameType {
    pub fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x01 => Ok(Self::PsStart),
            0x02 => Ok(Self::PsNext),
            0x03 => Ok(Self::PvStart),
            0x04 => Ok(Self::PvNext),
            0x06 => Ok(Self::Event),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub flags: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(frame_type: FrameType, payload: Vec<u8>) -> Self {
        Self { frame_type, flags: 0, payload }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let length = (self.payload.len() + 2) as u32;
        let mut out = Vec::with_capacity(4 + length as usize);
        out.extend_from_slice(&length.to_be_bytes());
        out.push(self.frame_type as u8);
        out.push(self.flags);
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Decode every complete frame buffered in `data`, returning the decoded
/// frames and the residual (possibly empty) trailing bytes. Never drops
/// bytes across calls: the residual is meant to be prepended to the next
/// chunk read from the transport.
pub fn decode_stream(data: &[u8]) -> Result<(Vec<Frame>, Vec<u8>), FrameError> {
    let mut frames = Vec::new();
    let mut pos = 0;
    loop {
        let remaining = &data[pos..];
        if remaining.len() < 4 {
            break;
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&remaining[..4]);
        let length = u32::from_be_bytes(len_bytes) as usize;
        if length < 2 {
            return Err(FrameError::UnknownFrameType(0));
        }
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::InsufficientData { declared: length, buffered: remaining.len() });
        }
        if remaining.len() < 4 + length {
            break;
        }
        let frame_type = FrameType::from_byte(remaining[4])?;
        let flags = remaining[5];
        let payload = remaining[6..4 + length].to_vec();
        frames.push(Frame { frame_type, flags, payload });
        pos += 4 + length;
    }
    Ok((frames, data[pos..].to_vec()))
}
