//! Ambient configuration: timeouts and button-action timings.

use std::time::Duration;

/// Tunables for the pairing state machines and Companion session.
///
/// Every field has HomeKit's standard literal default; callers only
/// override these in tests or to compensate for an unusually slow network.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Timeout applied to every suspension point: a pairing reply, a frame
    /// read, or a connect attempt.
    pub suspension_timeout: Duration,
    /// Dwell between press and release for a single HID tap.
    pub tap_dwell: Duration,
    /// Gap between the two tap cycles of a double tap.
    pub double_tap_gap: Duration,
    /// Dwell before releasing a held HID button.
    pub hold_dwell: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            suspension_timeout: Duration::from_secs(10),
            tap_dwell: Duration::from_millis(50),
            double_tap_gap: Duration::from_millis(100),
            hold_dwell: Duration::from_secs(1),
        }
    }
}
