//! Media-control requests: `{ "_mcc": media_code, ...params }`.

use crate::opack::Value;
use std::collections::BTreeMap;

/// Stable media command codes (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaCommand {
    Play = 1,
    Pause = 2,
    Next = 3,
    Prev = 4,
    GetVolume = 5,
    SetVolume = 6,
    SkipBy = 7,
    FastForwardBegin = 8,
    FastForwardEnd = 9,
    RewindBegin = 10,
    RewindEnd = 11,
    CaptionGet = 12,
    CaptionSet = 13,
}

pub(crate) fn media_payload(command: MediaCommand, params: BTreeMap<String, Value>) -> Value {
    let mut map = params;
    map.insert("_mcc".to_string(), Value::Int(command as i64));
    Value::Map(map)
}
