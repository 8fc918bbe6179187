//! Pair-Verify driver (C7): `PV1 → PV2 → PV3 → PV4`, ephemeral per session.
//!
//! Uses X25519 key agreement plus Ed25519 signatures over previously
//! provisioned credentials to install the per-session ChaCha20-Poly1305
//! channel keys.

use crate::credentials::CredentialsRecord;
use crate::crypto::{hkdf_sha512, open_with_label, seal_with_label};
use crate::frame::{Frame, FrameType};
use crate::pairing::{HostIdentity, PairingRejection};
use crate::tlv8::{tags, TlvReader, TlvWriter};
use crate::HapError;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

/// Channel keys and reset counters installed after PV4 completes.
#[derive(Debug)]
pub struct ChannelKeys {
    pub send_key: zeroize::Zeroizing<[u8; 32]>,
    pub recv_key: zeroize::Zeroizing<[u8; 32]>,
}

enum State {
    Idle,
    Pv1Sent { eph_secret: EphemeralSecret, eph_public: X25519PublicKey },
    Pv3Sent { shared: zeroize::Zeroizing<[u8; 32]> },
    Done,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            State::Idle => "Idle",
            State::Pv1Sent { .. } => "Pv1Sent",
            State::Pv3Sent { .. } => "Pv3Sent",
            State::Done => "Done",
        };
        f.debug_tuple("State").field(&label).finish()
    }
}

/// Drives the four pair-verify messages for one session.
#[derive(Debug)]
pub struct PairVerify {
    state: State,
    identity: HostIdentity,
    credentials: CredentialsRecord,
}

impl PairVerify {
    #[must_use]
    pub fn new(identity: HostIdentity, credentials: CredentialsRecord) -> Self {
        Self { state: State::Idle, identity, credentials }
    }

    /// Build PV1: `seqNo=0x01, publicKey=x25519_pub`, framed as `PV_START`.
    pub fn start(&mut self) -> Result<Frame, HapError> {
        if !matches!(self.state, State::Idle) {
            return Err(HapError::ProtocolError("pair-verify already started"));
        }
        let eph_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let eph_public = X25519PublicKey::from(&eph_secret);
        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x01)
            .push(tags::PUBLIC_KEY, eph_public.as_bytes().to_vec())
            .finish();
        self.state = State::Pv1Sent { eph_secret, eph_public };
        Ok(Frame::new(FrameType::PvStart, payload))
    }

    /// Process PV2 (`seqNo=0x02, publicKey=server_eph_pub, encryptedData`)
    /// and build PV3.
    pub fn process_pv2(&mut self, frame: &Frame) -> Result<Frame, HapError> {
        let State::Pv1Sent { eph_secret, eph_public } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(HapError::ProtocolError("process_pv2 called out of order"));
        };
        let tlv = TlvReader::decode(&frame.payload);
        expect_state(&tlv, 0x02)?;
        if let Some(rejection) = decode_rejection(&tlv) {
            return Err(rejection.into());
        }
        let server_eph_bytes = tlv.require(tags::PUBLIC_KEY)?;
        let server_encrypted = tlv.require(tags::ENCRYPTED_DATA)?;

        let server_eph_array: [u8; 32] = server_eph_bytes.try_into().map_err(|_| HapError::ProtocolError("malformed server ephemeral public key"))?;
        let server_eph_public = X25519PublicKey::from(server_eph_array);
        let shared = eph_secret.diffie_hellman(&server_eph_public);
        let shared = zeroize::Zeroizing::new(*shared.as_bytes());

        let verify_encrypt_key = hkdf_sha512("Pair-Verify-Encrypt-Salt", "Pair-Verify-Encrypt-Info", &*shared)?;
        let inner_bytes = open_with_label(&verify_encrypt_key, b"PV-Msg02", server_encrypted)?;
        let inner = TlvReader::decode(&inner_bytes);
        let server_identifier = inner.require(tags::IDENTIFIER)?.to_vec();
        let signature_bytes = inner.require(tags::SIGNATURE)?;

        let mut signed = Vec::new();
        signed.extend_from_slice(server_eph_array.as_slice());
        signed.extend_from_slice(&server_identifier);
        signed.extend_from_slice(eph_public.as_bytes());

        let server_key = VerifyingKey::from_bytes(
            self.credentials
                .server_ltpk
                .as_slice()
                .try_into()
                .map_err(|_| HapError::SignatureVerificationFailed)?,
        )
        .map_err(|_| HapError::SignatureVerificationFailed)?;
        let signature = Signature::from_slice(signature_bytes).map_err(|_| HapError::SignatureVerificationFailed)?;
        server_key
            .verify(&signed, &signature)
            .map_err(|_| HapError::SignatureVerificationFailed)?;

        let mut to_sign = Vec::new();
        to_sign.extend_from_slice(eph_public.as_bytes());
        to_sign.extend_from_slice(self.identity.pairing_id.as_bytes());
        to_sign.extend_from_slice(server_eph_array.as_slice());
        let client_signature: Signature = self.identity.signing_key.sign(&to_sign);

        let plaintext_inner = TlvWriter::new()
            .push(tags::IDENTIFIER, self.identity.pairing_id.clone().into_bytes())
            .push(tags::SIGNATURE, client_signature.to_bytes().to_vec())
            .finish();
        let encrypted = seal_with_label(&verify_encrypt_key, b"PV-Msg03", &plaintext_inner)?;

        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x03)
            .push(tags::ENCRYPTED_DATA, encrypted)
            .finish();
        self.state = State::Pv3Sent { shared };
        Ok(Frame::new(FrameType::PvNext, payload))
    }

    /// Process PV4 (`seqNo=0x04` or an error) and derive the channel keys.
    pub fn process_pv4(&mut self, frame: &Frame) -> Result<ChannelKeys, HapError> {
        let State::Pv3Sent { shared } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(HapError::ProtocolError("process_pv4 called out of order"));
        };
        let tlv = TlvReader::decode(&frame.payload);
        expect_state(&tlv, 0x04)?;
        if let Some(rejection) = decode_rejection(&tlv) {
            return Err(rejection.into());
        }

        let recv_key = hkdf_sha512("Control-Salt", "Control-Read-Encryption-Key", &*shared)?;
        let send_key = hkdf_sha512("Control-Salt", "Control-Write-Encryption-Key", &*shared)?;
        self.state = State::Done;
        Ok(ChannelKeys {
            send_key: zeroize::Zeroizing::new(send_key),
            recv_key: zeroize::Zeroizing::new(recv_key),
        })
    }
}

fn expect_state(tlv: &TlvReader, expected: u8) -> Result<(), HapError> {
    let actual = tlv.require_u8(tags::STATE)?;
    if actual != expected {
        return Err(HapError::ProtocolError("unexpected seqNo in pair-verify reply"));
    }
    Ok(())
}

fn decode_rejection(tlv: &TlvReader) -> Option<PairingRejection> {
    let code = tlv.get_u8(tags::ERROR)?;
    let retry_delay = tlv.get_u8(tags::RETRY_DELAY).map(u32::from);
    Some(PairingRejection::from_code(code, retry_delay))
}
