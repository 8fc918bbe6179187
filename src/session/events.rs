//! Inbound event dispatch: keyboard focus transitions, now-playing info, and
//! any other Companion `_t`-tagged payload forwarded to registered observers.

use crate::opack::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// An event forwarded to an [`super::Session`]'s observers.
#[derive(Debug, Clone)]
pub enum Event {
    /// Keyboard focus gained (text input started).
    TextInputStarted,
    /// Keyboard focus lost (text input stopped).
    TextInputStopped,
    /// `_nowPlayingInfo` or any other unrecognised `_t` payload, forwarded
    /// verbatim so callers can parse device-specific fields themselves.
    NowPlaying(Value),
    Other { tag: String, payload: Value },
    /// The transport dropped and the one automatic reconnect attempt failed.
    ConnectionLost,
    /// The transport dropped and the one automatic reconnect attempt
    /// succeeded; Pair-Verify was re-run transparently.
    Reconnected,
}

pub type ObserverCallback = Arc<dyn Fn(Event) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ObserverTable {
    next_id: AtomicU64,
    observers: Mutex<Vec<(u64, ObserverCallback)>>,
}

impl std::fmt::Debug for ObserverTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.observers.lock().map(|o| o.len()).unwrap_or(0);
        f.debug_struct("ObserverTable").field("count", &count).finish()
    }
}

impl ObserverTable {
    pub(crate) fn register(&self, callback: ObserverCallback) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().unwrap().push((id, callback));
        Subscription { id }
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.observers.lock().unwrap().retain(|(existing, _)| *existing != id);
    }

    pub(crate) fn dispatch(&self, event: Event) {
        for (_, callback) in self.observers.lock().unwrap().iter() {
            callback(event.clone());
        }
    }
}

/// A handle returned by `observe_events`; dropping it does not unregister —
/// call [`Session::unsubscribe`](super::Session::unsubscribe) explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: u64,
}
