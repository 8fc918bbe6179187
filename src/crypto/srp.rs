//! SRP-6a client (component C3): RFC-5054 Group-15 (3072-bit), SHA-512,
//! username `"Pair-Setup"`.
//!
//! This wraps the `idevice-srp` crate's client rather than re-deriving
//! modular exponentiation by hand — it implements exactly this HAP variant
//! of SRP-6a and is already exercised by this crate's grounding corpus for
//! the same pair-setup flow.

use idevice_srp::{client::SrpClient, groups::G_3072};
use rand::RngCore;
use sha2::Sha512;
use thiserror::Error;
use zeroize::Zeroizing;

const USERNAME: &[u8] = b"Pair-Setup";

#[derive(Debug, Error)]
pub enum SrpError {
    #[error("server public key B was rejected (B mod N == 0, or the reply was malformed)")]
    InvalidServerKey,
    #[error("server proof (M2) did not match the client's expectation")]
    ProofMismatch,
}

/// One SRP-6a exchange. Consumes itself on the proof-verification step so a
/// half-failed session can't be resumed, per this crate's error propagation
/// rule.
pub struct SrpSession {
    client: SrpClient<'static, Sha512>,
    a_private: Zeroizing<[u8; 32]>,
    a_public: Vec<u8>,
}

impl std::fmt::Debug for SrpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpSession")
            .field("a_public_len", &self.a_public.len())
            .finish_non_exhaustive()
    }
}

/// Verifying state reached after the client has processed the server's
/// `(salt, B)` challenge: holds the client proof to send and the not-yet
/// accepted session key.
pub struct SrpVerifier {
    verifier: idevice_srp::client::SrpClientVerifier<Sha512>,
}

impl std::fmt::Debug for SrpVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpVerifier").finish_non_exhaustive()
    }
}

impl SrpSession {
    /// Sample a fresh 32-byte private scalar `a` and compute the 384-byte
    /// big-endian public value `A = g^a mod N` sent in M3.
    #[must_use]
    pub fn new() -> Self {
        let client = SrpClient::<Sha512>::new(&G_3072);
        let mut a_private = [0u8; 32];
        rand::rng().fill_bytes(&mut a_private);
        let a_public = client.compute_public_ephemeral(&a_private);
        Self {
            client,
            a_private: Zeroizing::new(a_private),
            a_public,
        }
    }

    /// The 384-byte (left zero-padded) public value `A`.
    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.a_public
    }

    /// Process the server's `(salt, B)` challenge, deriving the shared
    /// session key `K` and the client proof `M1` to send in M3.
    ///
    /// Fails with [`SrpError::InvalidServerKey`] if `B ≡ 0 (mod N)` or is
    /// otherwise malformed.
    pub fn process_challenge(self, salt: &[u8], server_public: &[u8], pin: &str) -> Result<(SrpVerifier, Vec<u8>), SrpError> {
        let verifier = self
            .client
            .process_reply(&*self.a_private, USERNAME, pin.as_bytes(), salt, server_public, false)
            .map_err(|_| SrpError::InvalidServerKey)?;
        let proof = verifier.proof().to_vec();
        Ok((SrpVerifier { verifier }, proof))
    }
}

impl Default for SrpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SrpVerifier {
    /// Verify the server's `M2` proof against the client's expectation,
    /// returning the 64-byte shared session key `K` on success.
    pub fn verify_server(self, server_proof: &[u8]) -> Result<Zeroizing<Vec<u8>>, SrpError> {
        self.verifier
            .verify_server(server_proof)
            .map_err(|_| SrpError::ProofMismatch)?;
        Ok(Zeroizing::new(self.verifier.key().to_vec()))
    }
}
