//! Pair-Setup (C6) and Pair-Verify (C7) state machines.

pub mod setup;
pub mod verify;

pub use setup::PairSetup;
pub use verify::PairVerify;

use thiserror::Error;

/// Error tag values returned by the device in TLV8 `error` fields (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PairingRejection {
    #[error("unknown error")]
    Unknown,
    #[error("authentication failed (wrong PIN)")]
    Authentication,
    #[error("back off for {0} seconds before retrying")]
    BackOff(u32),
    #[error("device has reached its maximum number of peers")]
    MaxPeers,
    #[error("too many failed pairing attempts")]
    MaxTries,
    #[error("device is unavailable")]
    Unavailable,
    #[error("device is busy")]
    Busy,
}

impl PairingRejection {
    /// Decode an `error` TLV (plus, for `BackOff`, the sibling `retry_delay`
    /// tag if present).
    #[must_use]
    pub fn from_code(code: u8, retry_delay: Option<u32>) -> Self {
        match code {
            0x02 => Self::Authentication,
            0x03 => Self::BackOff(retry_delay.unwrap_or(0)),
            0x04 => Self::MaxPeers,
            0x05 => Self::MaxTries,
            0x06 => Self::Unavailable,
            0x07 => Self::Busy,
            _ => Self::Unknown,
        }
    }
}

/// Identity material the host brings to every pairing: its own Ed25519
/// signing key and the stable pairing identifier it presents to the
/// accessory. Generated once per host install, not per session.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    pub pairing_id: String,
    pub signing_key: ed25519_dalek::SigningKey,
}

impl HostIdentity {
    #[must_use]
    pub fn generate(pairing_id: impl Into<String>) -> Self {
        let signing_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self { pairing_id: pairing_id.into(), signing_key }
    }

    #[must_use]
    pub fn public_key_raw(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}
