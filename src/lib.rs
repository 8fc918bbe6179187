#![warn(missing_debug_implementations)]
// A Rust library to pair with and remote-control an Apple TV over HAP and the Companion link.

pub mod config;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod frame;
pub mod opack;
pub mod pairing;
pub mod session;
pub mod tlv8;
pub mod transport;

pub use config::Config;
pub use credentials::{CredentialStore, CredentialsRecord, FileCredentialStore};
pub use device::Device;
pub use session::Session;
pub use transport::{StreamTransport, TcpTransport, Transport};

use std::io;
use thiserror::Error;

/// Trait combining everything a Companion transport socket needs to provide.
///
/// Mirrors the blanket `AsyncRead + AsyncWrite` socket trait convention used
/// throughout this crate's sibling protocol clients: anything satisfying it
/// (a `tokio::net::TcpStream`, a mock pipe in tests) can back a [`Session`].
pub trait ReadWrite:
    tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + std::fmt::Debug
{
}

impl<T> ReadWrite for T where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + std::fmt::Debug
{
}

/// All fatal and recoverable error conditions surfaced by this crate.
///
/// Codec- and crypto-level errors are wrapped via `#[from]` so callers see one
/// flat error type at the public boundary; component-local enums
/// (`tlv8::Tlv8Error`, `opack::OpackError`, `crypto::CryptoError`,
/// `crypto::srp::SrpError`, `frame::FrameError`) remain the types those
/// modules operate on internally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HapError {
    #[error("io error")]
    Io(#[from] io::Error),

    #[error("tlv8 decode error: {0}")]
    Tlv8(#[from] tlv8::Tlv8Error),

    #[error("opack codec error: {0}")]
    Opack(#[from] opack::OpackError),

    #[error("frame codec error: {0}")]
    Frame(#[from] frame::FrameError),

    #[error("srp error: {0}")]
    Srp(#[from] crypto::srp::SrpError),

    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("json error")]
    Json(#[from] serde_json::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("transport closed by peer")]
    TransportClosed,

    #[error("protocol error: unexpected state {0}")]
    ProtocolError(&'static str),

    #[error("pairing rejected: {0}")]
    PairingRejected(#[from] pairing::PairingRejection),

    #[error("signature verification failed")]
    SignatureVerificationFailed,

    #[error("srp proof mismatch")]
    ProofMismatch,

    #[error("text input field is not focused")]
    NotFocused,

    #[error("session is not connected")]
    NotConnected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("credential store: record not found for {0}")]
    NotFound(String),
}

impl HapError {
    /// Stable discriminant for callers that bridge this error across an FFI boundary.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Io(_) => -1,
            Self::Tlv8(_) => -2,
            Self::Opack(_) => -3,
            Self::Frame(_) => -4,
            Self::Srp(_) => -5,
            Self::Crypto(_) => -6,
            Self::Json(_) => -7,
            Self::Timeout => -8,
            Self::TransportClosed => -9,
            Self::ProtocolError(_) => -10,
            Self::PairingRejected(_) => -11,
            Self::SignatureVerificationFailed => -12,
            Self::ProofMismatch => -13,
            Self::NotFocused => -14,
            Self::NotConnected => -15,
            Self::Cancelled => -16,
            Self::NotFound(_) => -17,
        }
    }
}
