//! Pair-Setup driver (C6): `Idle → M1Sent → M3Sent → M5Sent → Done`.
//!
//! Orchestrates the SRP-6a exchange (C3) and the HKDF/AEAD helpers (C4),
//! composes TLV8 payloads (C1), and on success persists the credentials
//! record (the caller is responsible for the actual `CredentialStore::put`
//! call; this driver only returns the record).

use crate::credentials::CredentialsRecord;
use crate::crypto::srp::{SrpSession, SrpVerifier};
use crate::crypto::{hkdf_sha512, open_with_label, seal_with_label};
use crate::frame::{Frame, FrameType};
use crate::pairing::{HostIdentity, PairingRejection};
use crate::tlv8::{tags, TlvReader, TlvWriter};
use crate::HapError;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};

#[derive(Debug)]
enum State {
    Idle,
    M1Sent { srp: SrpSession },
    M3Sent { verifier: SrpVerifier },
    M5Sent { session_key: zeroize::Zeroizing<Vec<u8>> },
    Done,
}

/// Drives the six pair-setup messages for one pairing attempt.
#[derive(Debug)]
pub struct PairSetup {
    state: State,
    identity: HostIdentity,
}

impl PairSetup {
    #[must_use]
    pub fn new(identity: HostIdentity) -> Self {
        Self { state: State::Idle, identity }
    }

    /// Build M1: `seqNo=0x01, method=0x00`, framed as `PS_START`.
    pub fn start(&mut self) -> Result<Frame, HapError> {
        if !matches!(self.state, State::Idle) {
            return Err(HapError::ProtocolError("pair-setup already started"));
        }
        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x01)
            .push_u8(tags::METHOD, 0x00)
            .finish();
        self.state = State::M1Sent { srp: SrpSession::new() };
        Ok(Frame::new(FrameType::PsStart, payload))
    }

    /// Process M2 (`seqNo=0x02, salt, publicKey(B)`) and build M3.
    pub fn process_m2(&mut self, frame: &Frame, pin: &str) -> Result<Frame, HapError> {
        let State::M1Sent { srp } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(HapError::ProtocolError("process_m2 called out of order"));
        };
        let tlv = TlvReader::decode(&frame.payload);
        expect_state(&tlv, 0x02)?;
        if let Some(rejection) = decode_rejection(&tlv) {
            return Err(rejection.into());
        }
        let salt = tlv.require(tags::SALT)?.to_vec();
        let server_public = tlv.require(tags::PUBLIC_KEY)?.to_vec();
        let a_public = srp.public_key().to_vec();

        let (verifier, client_proof) = srp
            .process_challenge(&salt, &server_public, pin)
            .map_err(|e| match e {
                crate::crypto::srp::SrpError::InvalidServerKey => HapError::ProtocolError("invalid server SRP public key"),
                crate::crypto::srp::SrpError::ProofMismatch => HapError::ProofMismatch,
            })?;

        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x03)
            .push(tags::PUBLIC_KEY, a_public)
            .push(tags::PROOF, client_proof)
            .finish();
        self.state = State::M3Sent { verifier };
        Ok(Frame::new(FrameType::PsNext, payload))
    }

    /// Process M4 (`seqNo=0x04, proof(M2)` or an error) and build M5.
    pub fn process_m4(&mut self, frame: &Frame) -> Result<Frame, HapError> {
        let State::M3Sent { verifier } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(HapError::ProtocolError("process_m4 called out of order"));
        };
        let tlv = TlvReader::decode(&frame.payload);
        expect_state(&tlv, 0x04)?;
        if let Some(rejection) = decode_rejection(&tlv) {
            return Err(rejection.into());
        }
        let server_proof = tlv.require(tags::PROOF)?;
        let session_key = verifier.verify_server(server_proof).map_err(|_| HapError::ProofMismatch)?;

        let encrypt_key = hkdf_sha512("Pair-Setup-Encrypt-Salt", "Pair-Setup-Encrypt-Info", &session_key)?;
        let sign_key = hkdf_sha512("Pair-Setup-Controller-Sign-Salt", "Pair-Setup-Controller-Sign-Info", &session_key)?;

        let client_ltpk = self.identity.public_key_raw();
        let mut device_info = Vec::new();
        device_info.extend_from_slice(&sign_key);
        device_info.extend_from_slice(self.identity.pairing_id.as_bytes());
        device_info.extend_from_slice(&client_ltpk);
        let signature: Signature = self.identity.signing_key.sign(&device_info);

        let inner = TlvWriter::new()
            .push(tags::IDENTIFIER, self.identity.pairing_id.clone().into_bytes())
            .push(tags::PUBLIC_KEY, client_ltpk.to_vec())
            .push(tags::SIGNATURE, signature.to_bytes().to_vec())
            .finish();
        let encrypted = seal_with_label(&encrypt_key, b"PS-Msg05", &inner)?;

        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x05)
            .push(tags::ENCRYPTED_DATA, encrypted)
            .finish();
        self.state = State::M5Sent { session_key };
        Ok(Frame::new(FrameType::PsNext, payload))
    }

    /// Process M6 (`seqNo=0x06, encryptedData`), verify the accessory's
    /// signature, and return the completed credentials record.
    pub fn process_m6(&mut self, frame: &Frame) -> Result<CredentialsRecord, HapError> {
        let State::M5Sent { session_key } = std::mem::replace(&mut self.state, State::Idle) else {
            return Err(HapError::ProtocolError("process_m6 called out of order"));
        };
        let tlv = TlvReader::decode(&frame.payload);
        expect_state(&tlv, 0x06)?;
        if let Some(rejection) = decode_rejection(&tlv) {
            return Err(rejection.into());
        }
        let encrypted = tlv.require(tags::ENCRYPTED_DATA)?;

        let encrypt_key = hkdf_sha512("Pair-Setup-Encrypt-Salt", "Pair-Setup-Encrypt-Info", &session_key)?;
        let inner_bytes = open_with_label(&encrypt_key, b"PS-Msg06", encrypted)?;
        let inner = TlvReader::decode(&inner_bytes);

        let server_identifier = inner.require(tags::IDENTIFIER)?.to_vec();
        let server_ltpk = inner.require(tags::PUBLIC_KEY)?.to_vec();
        let signature_bytes = inner.require(tags::SIGNATURE)?;

        let accessory_sign_key = hkdf_sha512(
            "Pair-Setup-Accessory-Sign-Salt",
            "Pair-Setup-Accessory-Sign-Info",
            &session_key,
        )?;
        let mut signed = Vec::new();
        signed.extend_from_slice(&accessory_sign_key);
        signed.extend_from_slice(&server_identifier);
        signed.extend_from_slice(&server_ltpk);

        let server_key = VerifyingKey::from_bytes(
            server_ltpk.as_slice().try_into().map_err(|_| HapError::SignatureVerificationFailed)?,
        )
        .map_err(|_| HapError::SignatureVerificationFailed)?;
        let signature = Signature::from_slice(signature_bytes).map_err(|_| HapError::SignatureVerificationFailed)?;
        server_key
            .verify(&signed, &signature)
            .map_err(|_| HapError::SignatureVerificationFailed)?;

        self.state = State::Done;
        Ok(CredentialsRecord {
            identifier: self.identity.pairing_id.clone(),
            client_ltpk: self.identity.public_key_raw().to_vec(),
            server_ltpk,
        })
    }
}

fn expect_state(tlv: &TlvReader, expected: u8) -> Result<(), HapError> {
    let actual = tlv.require_u8(tags::STATE)?;
    if actual != expected {
        return Err(HapError::ProtocolError("unexpected seqNo in pair-setup reply"));
    }
    Ok(())
}

fn decode_rejection(tlv: &TlvReader) -> Option<PairingRejection> {
    let code = tlv.get_u8(tags::ERROR)?;
    let retry_delay = tlv.get_u8(tags::RETRY_DELAY).map(u32::from);
    Some(PairingRejection::from_code(code, retry_delay))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An M2-shaped frame with an arbitrary (not necessarily device-correct)
    /// salt/`B`. Good enough to drive `process_m2` into `M3Sent` without a
    /// real SRP server on the other end, which is all the tests below need.
    fn fake_m2() -> Frame {
        let salt = vec![0xAAu8; 16];
        let mut server_public = vec![0u8; 384];
        server_public[383] = 0x07;
        let payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x02)
            .push(tags::SALT, salt)
            .push(tags::PUBLIC_KEY, server_public)
            .finish();
        Frame::new(FrameType::PsNext, payload)
    }

    #[test]
    fn scenario_s5_wrong_pin_surfaces_as_pairing_rejected() {
        let identity = HostIdentity::generate("test-host");
        let mut driver = PairSetup::new(identity);
        driver.start().unwrap();
        driver.process_m2(&fake_m2(), "1234").unwrap();

        let m4 = Frame::new(
            FrameType::PsNext,
            TlvWriter::new().push_u8(tags::STATE, 0x04).push_u8(tags::ERROR, 0x02).finish(),
        );
        let err = driver.process_m4(&m4).unwrap_err();
        assert!(matches!(err, HapError::PairingRejected(PairingRejection::Authentication)));
    }

    #[test]
    fn mismatched_server_proof_is_rejected_without_a_matching_server() {
        // invariant 4 ("flipping any bit of M2 yields a rejected proof"):
        // with no real server on the other end, any M4 proof is effectively
        // an arbitrary bit pattern relative to what the client computed, so
        // this exercises the same failure path without needing a full SRP-6a
        // server simulator.
        let identity = HostIdentity::generate("test-host");
        let mut driver = PairSetup::new(identity);
        driver.start().unwrap();
        driver.process_m2(&fake_m2(), "1234").unwrap();

        let m4 = Frame::new(
            FrameType::PsNext,
            TlvWriter::new().push_u8(tags::STATE, 0x04).push(tags::PROOF, vec![0u8; 64]).finish(),
        );
        let err = driver.process_m4(&m4).unwrap_err();
        assert!(matches!(err, HapError::ProofMismatch));
    }

    #[test]
    fn process_m2_out_of_order_is_a_protocol_error() {
        let identity = HostIdentity::generate("test-host");
        let mut driver = PairSetup::new(identity);
        // start() was never called, so the driver is still Idle.
        let err = driver.process_m2(&fake_m2(), "1234").unwrap_err();
        assert!(matches!(err, HapError::ProtocolError(_)));
    }
}
