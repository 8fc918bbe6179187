//! Remote Text Input (RTI): keyboard focus tracking and text field updates.

use crate::opack::Value;

/// Keyboard focus state tracked per session (§3 Session state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardFocus {
    Focused,
    Unfocused,
}

pub(crate) fn text_input_payload(text: &str, clear: bool) -> Value {
    Value::map([
        ("_t", Value::str("_tiStart")),
        (
            "_tiData",
            Value::map([("text", Value::str(text)), ("clear", Value::Bool(clear))]),
        ),
    ])
}
