//! Companion session (C8): owns the authenticated channel, sends HID/media/
//! RTI requests, dispatches inbound events, and manages the single
//! permitted reconnect attempt.

pub mod events;
pub mod hid;
pub mod media;
pub mod text;

pub use events::{Event, Subscription};
pub use hid::{HidKey, PressAction};
pub use media::MediaCommand;
pub use text::KeyboardFocus;

use crate::config::Config;
use crate::credentials::CredentialsRecord;
use crate::crypto::{open_with_counter, seal_with_counter};
use crate::device::Device;
use crate::frame::{decode_stream, Frame, FrameType};
use crate::opack::Value;
use crate::pairing::{HostIdentity, PairSetup, PairVerify};
use crate::transport::{StreamTransport, Transport};
use crate::HapError;
use events::ObserverTable;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

struct EstablishedChannel {
    send_key: Zeroizing<[u8; 32]>,
    recv_key: Zeroizing<[u8; 32]>,
    send_counter: u64,
    recv_counter: u64,
}

/// Tagged session state, per this crate's design notes: exactly one of
/// these is active at a time, eliminating aliasing between the pairing
/// drivers and the established channel.
///
/// `Pairing`/`Verifying` hold the live handshake driver for the duration of
/// `pair`/`verify`, not just a label: every step reads and writes it through
/// `self.state` so a `Timeout`, a transport error, or a cancellation that
/// lands mid-handshake is visible there too. Any such failure moves the
/// session to `Poisoned`, which `ensure_idle` refuses to leave — the caller
/// must build a fresh `Session` rather than retry the same one.
enum SessionState {
    Idle,
    Pairing(PairSetup),
    Verifying(PairVerify),
    Established(EstablishedChannel),
    Poisoned,
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SessionState::Idle => "Idle",
            SessionState::Pairing(_) => "Pairing",
            SessionState::Verifying(_) => "Verifying",
            SessionState::Established(_) => "Established",
            SessionState::Poisoned => "Poisoned",
        };
        f.debug_tuple("SessionState").field(&label).finish()
    }
}

/// One Companion connection to one Apple TV.
///
/// Generic over the underlying byte stream (`T`, defaulting to a real
/// `TcpStream`) so tests can drive the whole pairing/session flow over an
/// in-memory duplex pipe standing in for the Apple TV side.
#[derive(Debug)]
pub struct Session<T: Transport = TcpStream> {
    transport: StreamTransport<T>,
    recv_buf: Vec<u8>,
    pending_frames: std::collections::VecDeque<Frame>,
    state: SessionState,
    device: Device,
    identity: HostIdentity,
    config: Config,
    focus: KeyboardFocus,
    last_text: Option<String>,
    observers: Arc<ObserverTable>,
    cancel: CancellationToken,
}

impl Session<TcpStream> {
    /// Dial the device's Companion endpoint. Neither pairs nor verifies;
    /// call [`Session::pair`] or [`Session::verify`] next.
    pub async fn connect(device: Device, identity: HostIdentity, config: Config) -> Result<Self, HapError> {
        let transport = StreamTransport::connect(device.address, device.port, config.suspension_timeout).await?;
        Ok(Self::from_transport(transport, device, identity, config))
    }
}

impl<T: Transport> Session<T> {
    /// Build a session directly from an already-connected transport. The
    /// real entry point is [`Session::connect`]; this is what lets tests
    /// (and any future non-TCP `Transport`) construct one without dialing.
    pub fn from_transport(transport: StreamTransport<T>, device: Device, identity: HostIdentity, config: Config) -> Self {
        Self {
            transport,
            recv_buf: Vec::new(),
            pending_frames: std::collections::VecDeque::new(),
            state: SessionState::Idle,
            device,
            identity,
            config,
            focus: KeyboardFocus::Unfocused,
            last_text: None,
            observers: Arc::new(ObserverTable::default()),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// A cloneable handle that cancels this session's current or next
    /// suspension point. Hand it to whatever is watching for a shutdown
    /// signal (a Ctrl-C handler, a parent task) before starting a long
    /// `pair`/`verify`/`poll` call — calling [`CancellationToken::cancel`] on
    /// any clone, including one taken after the call already started,
    /// aborts it with [`HapError::Cancelled`].
    #[must_use]
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel whatever suspension point is currently in flight. Equivalent
    /// to calling `.cancel()` on a handle from [`Session::cancel_handle`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drop any installed channel keys and the in-progress handshake driver,
    /// replacing `self.state` with `Poisoned`. Key material wrapped in
    /// `Zeroizing` is scrubbed as the old state is dropped.
    fn poison(&mut self) {
        self.state = SessionState::Poisoned;
    }

    /// Refuse to start a new handshake unless the session is fully idle.
    fn ensure_idle(&self) -> Result<(), HapError> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Poisoned => {
                Err(HapError::ProtocolError("session is poisoned by a prior failure; reconnect to retry"))
            }
            _ => Err(HapError::ProtocolError("a pairing, verification, or established channel is already active")),
        }
    }

    fn pair_setup_driver_mut(&mut self) -> Result<&mut PairSetup, HapError> {
        match &mut self.state {
            SessionState::Pairing(driver) => Ok(driver),
            _ => Err(HapError::ProtocolError("pair-setup driver missing from session state")),
        }
    }

    fn pair_verify_driver_mut(&mut self) -> Result<&mut PairVerify, HapError> {
        match &mut self.state {
            SessionState::Verifying(driver) => Ok(driver),
            _ => Err(HapError::ProtocolError("pair-verify driver missing from session state")),
        }
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<(), HapError> {
        self.transport.send(&frame.encode()).await
    }

    /// Read the next complete frame, blocking on more transport reads as
    /// needed, with the whole wait (however many chunks it takes) bounded by
    /// the configured suspension timeout. Any additional frames decoded from
    /// the same transport read are queued in `pending_frames` so no bytes are
    /// ever dropped across calls.
    ///
    /// This is the crate's one suspension point: it's raced against
    /// `self.cancel` so a host that calls [`Session::cancel`] mid-read gets
    /// back `Cancelled` instead of waiting out the full timeout. A malformed
    /// peer that declares an oversized frame length is rejected by
    /// `decode_stream` rather than buffered toward indefinitely, and any
    /// error here — timeout, cancellation, or a rejected frame — poisons the
    /// session.
    async fn read_frame(&mut self) -> Result<Frame, HapError> {
        if let Some(frame) = self.pending_frames.pop_front() {
            return Ok(frame);
        }

        let cancel = self.cancel.clone();
        let suspension_timeout = self.config.suspension_timeout;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HapError::Cancelled),
            result = timeout(suspension_timeout, Self::fill_frame(&mut self.transport, &mut self.recv_buf, &mut self.pending_frames)) => {
                result.map_err(|_| HapError::Timeout).and_then(|inner| inner)
            }
        };

        match outcome {
            Ok(frame) => Ok(frame),
            Err(err) => {
                self.poison();
                if matches!(err, HapError::Cancelled) {
                    self.transport.shutdown().await.ok();
                }
                Err(err)
            }
        }
    }

    /// Accumulate chunks from `transport` into `recv_buf` until a full frame
    /// can be decoded. A free function (not a `&mut self` method) so
    /// [`Session::read_frame`] can borrow only these three fields for its
    /// `select!`, rather than all of `self`.
    async fn fill_frame(
        transport: &mut StreamTransport<T>,
        recv_buf: &mut Vec<u8>,
        pending_frames: &mut std::collections::VecDeque<Frame>,
    ) -> Result<Frame, HapError> {
        loop {
            let (frames, residual) = decode_stream(recv_buf)?;
            if !frames.is_empty() {
                *recv_buf = residual;
                pending_frames.extend(frames);
                return Ok(pending_frames.pop_front().expect("just extended"));
            }
            let chunk = transport.recv().await?;
            recv_buf.extend_from_slice(&chunk);
        }
    }

    /// Run Pair-Setup (M1–M6) to completion, returning the new credentials
    /// record. The caller is responsible for persisting it via a
    /// [`crate::CredentialStore`].
    ///
    /// Refuses to start unless the session is `Idle`. The driver lives in
    /// `self.state` for the duration of the exchange, so a mid-handshake
    /// failure — a rejection, a `Timeout`, a cancellation — poisons the
    /// session instead of leaving it possible to resume.
    pub async fn pair(&mut self, pin: &str) -> Result<CredentialsRecord, HapError> {
        self.ensure_idle()?;
        self.state = SessionState::Pairing(PairSetup::new(self.identity.clone()));

        let result = self.run_pair_setup(pin).await;
        if result.is_ok() {
            self.state = SessionState::Idle;
        } else {
            self.poison();
        }
        result
    }

    async fn run_pair_setup(&mut self, pin: &str) -> Result<CredentialsRecord, HapError> {
        let m1 = self.pair_setup_driver_mut()?.start()?;
        self.write_frame(m1).await?;

        let m2 = self.read_frame().await?;
        let m3 = self.pair_setup_driver_mut()?.process_m2(&m2, pin)?;
        self.write_frame(m3).await?;

        let m4 = self.read_frame().await?;
        let m5 = self.pair_setup_driver_mut()?.process_m4(&m4)?;
        self.write_frame(m5).await?;

        let m6 = self.read_frame().await?;
        self.pair_setup_driver_mut()?.process_m6(&m6)
    }

    /// Run Pair-Verify (PV1–PV4), installing the per-session channel keys,
    /// then send the `_sessionStart` request.
    ///
    /// Refuses to start unless the session is `Idle`, for the same reason as
    /// [`Session::pair`]: the driver lives in `self.state` so a failure
    /// anywhere in PV1–PV4 poisons the session rather than leaving it in an
    /// ambiguous partially-verified condition.
    pub async fn verify(&mut self, credentials: CredentialsRecord) -> Result<(), HapError> {
        self.ensure_idle()?;
        self.state = SessionState::Verifying(PairVerify::new(self.identity.clone(), credentials));

        let result = self.run_pair_verify().await;
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.poison();
                Err(err)
            }
        }
    }

    async fn run_pair_verify(&mut self) -> Result<(), HapError> {
        let pv1 = self.pair_verify_driver_mut()?.start()?;
        self.write_frame(pv1).await?;

        let pv2 = self.read_frame().await?;
        let pv3 = self.pair_verify_driver_mut()?.process_pv2(&pv2)?;
        self.write_frame(pv3).await?;

        let pv4 = self.read_frame().await?;
        let keys = self.pair_verify_driver_mut()?.process_pv4(&pv4)?;

        self.state = SessionState::Established(EstablishedChannel {
            send_key: keys.send_key,
            recv_key: keys.recv_key,
            send_counter: 0,
            recv_counter: 0,
        });

        let session_id = uuid::Uuid::new_v4().to_string();
        let payload = Value::map([("_i", Value::str(session_id)), ("_t", Value::str("_sessionStart"))]);
        self.send_established(payload).await
    }

    async fn send_established(&mut self, value: Value) -> Result<(), HapError> {
        let SessionState::Established(channel) = &mut self.state else {
            return Err(HapError::NotConnected);
        };
        let plaintext = value.to_bytes();
        let sealed = seal_with_counter(&*channel.send_key, channel.send_counter, &plaintext)?;
        channel.send_counter = channel
            .send_counter
            .checked_add(1)
            .ok_or_else(|| HapError::ProtocolError("send counter wrapped"))?;
        self.write_frame(Frame::new(FrameType::Event, sealed)).await
    }

    /// Read and dispatch the next inbound frame to registered observers.
    /// Intended to be driven in a loop by the host application alongside
    /// `send_*` calls.
    pub async fn poll(&mut self) -> Result<(), HapError> {
        let frame = self.read_frame().await?;
        self.dispatch_inbound(frame)
    }

    fn dispatch_inbound(&mut self, frame: Frame) -> Result<(), HapError> {
        let SessionState::Established(channel) = &mut self.state else {
            return Err(HapError::ProtocolError("received a data frame before Pair-Verify completed"));
        };
        let opened = match open_with_counter(&*channel.recv_key, channel.recv_counter, &frame.payload) {
            Ok(bytes) => bytes,
            Err(err) => return Err(err.into()),
        };
        channel.recv_counter = channel
            .recv_counter
            .checked_add(1)
            .ok_or_else(|| HapError::ProtocolError("recv counter wrapped"))?;

        let value = match Value::decode(&opened) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(?err, "inbound Companion payload did not parse as OPACK");
                return Ok(());
            }
        };
        let Some(map) = value.as_map() else {
            tracing::warn!("inbound Companion payload was not a map");
            return Ok(());
        };
        let Some(tag) = map.get("_t").and_then(Value::as_str) else {
            return Ok(());
        };

        match tag {
            "_tiStarted" | "_tiStopped" => {
                self.focus = if map.contains_key("_tiD") {
                    KeyboardFocus::Focused
                } else {
                    KeyboardFocus::Unfocused
                };
                self.observers.dispatch(if tag == "_tiStarted" { Event::TextInputStarted } else { Event::TextInputStopped });
            }
            "_nowPlayingInfo" => self.observers.dispatch(Event::NowPlaying(value.clone())),
            other => self.observers.dispatch(Event::Other { tag: other.to_string(), payload: value.clone() }),
        }
        Ok(())
    }

    /// Send a HID button intent, expanding `action` into the appropriate
    /// press/release timing (§4.8).
    pub async fn send_key(&mut self, key: HidKey, action: PressAction) -> Result<(), HapError> {
        match action {
            PressAction::Tap => {
                self.send_established(hid::hid_payload(key, true)).await?;
                tokio::time::sleep(self.config.tap_dwell).await;
                self.send_established(hid::hid_payload(key, false)).await
            }
            PressAction::DoubleTap => {
                self.send_key(key, PressAction::Tap).await?;
                tokio::time::sleep(self.config.double_tap_gap).await;
                self.send_key(key, PressAction::Tap).await
            }
            PressAction::Hold => {
                self.send_established(hid::hid_payload(key, true)).await?;
                tokio::time::sleep(self.config.hold_dwell).await;
                self.send_established(hid::hid_payload(key, false)).await
            }
        }
    }

    /// Send a media-control command.
    pub async fn send_media(&mut self, command: MediaCommand, params: BTreeMap<String, Value>) -> Result<(), HapError> {
        self.send_established(media::media_payload(command, params)).await
    }

    /// Register interest in named Companion events (`_interest`).
    pub async fn register_events(&mut self, event_names: &[&str]) -> Result<(), HapError> {
        let names = Value::Array(event_names.iter().map(|n| Value::str(*n)).collect());
        let payload = Value::map([("_t", Value::str("_interest")), ("_regEvents", names)]);
        self.send_established(payload).await
    }

    /// Returns the last text observed on a focused field.
    ///
    /// `NotFocused` if the keyboard doesn't currently have focus — this is a
    /// local, recoverable error that doesn't disturb the session.
    pub fn get_text(&self) -> Result<String, HapError> {
        match self.focus {
            KeyboardFocus::Focused => Ok(self.last_text.clone().unwrap_or_default()),
            KeyboardFocus::Unfocused => Err(HapError::NotFocused),
        }
    }

    /// Replace (`clear=true`) or append to (`clear=false`) the focused text
    /// field. Returns `NotFocused` without emitting any frame if there is no
    /// focused field.
    pub async fn set_text(&mut self, text: &str, clear: bool) -> Result<(), HapError> {
        if self.focus == KeyboardFocus::Unfocused {
            return Err(HapError::NotFocused);
        }
        self.last_text = Some(if clear {
            text.to_string()
        } else {
            format!("{}{}", self.last_text.clone().unwrap_or_default(), text)
        });
        self.send_established(text::text_input_payload(text, clear)).await
    }

    /// Register a callback invoked for every dispatched [`Event`].
    pub fn observe_events(&self, callback: impl Fn(Event) + Send + Sync + 'static) -> Subscription {
        self.observers.register(Arc::new(callback))
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.observers.unregister(subscription.id);
    }

    /// Close the transport and zero any installed channel key material.
    pub fn disconnect(mut self) {
        self.state = SessionState::Idle;
        // `self` (and the zeroizing key wrappers inside `SessionState`) is
        // dropped here, scrubbing key material from memory.
    }
}

impl Session<TcpStream> {
    /// Attempt one reconnect after a transport error: re-dial, re-run
    /// Pair-Verify, and resume. Emits `Reconnected` on success or
    /// `ConnectionLost` on failure.
    pub async fn reconnect(&mut self, credentials: CredentialsRecord) -> Result<(), HapError> {
        match StreamTransport::connect(self.device.address, self.device.port, self.config.suspension_timeout).await {
            Ok(transport) => {
                self.transport = transport;
                self.recv_buf.clear();
                self.pending_frames.clear();
                self.state = SessionState::Idle;
                // A cancellation aimed at the old connection must not carry
                // over and instantly abort the new one.
                self.cancel = CancellationToken::new();
                match self.verify(credentials).await {
                    Ok(()) => {
                        self.observers.dispatch(Event::Reconnected);
                        Ok(())
                    }
                    Err(err) => {
                        self.observers.dispatch(Event::ConnectionLost);
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.observers.dispatch(Event::ConnectionLost);
                Err(err)
            }
        }
    }
}
