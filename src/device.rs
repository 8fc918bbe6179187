//! Discovered Apple TV handle.
//!
//! Bonjour/mDNS browsing itself is out of scope for this crate; callers hand
//! in the resolved `{name, address, port, txt_record}` triple and this module
//! only classifies and stores it.

use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Coarse classification of a discovered device, derived from its TXT record
/// or model string. Never gates protocol behaviour; used only to let `scan()`
/// filter candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AppleTv,
    HomePod,
    Unknown,
}

/// Immutable handle to a device found during discovery.
///
/// The core never mutates a `Device`; it is a pass-through value from the
/// discovery collaborator to `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub identifier: String,
    pub name: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub model: Option<String>,
    pub properties: HashMap<String, String>,
}

impl Device {
    /// Build a `Device` from a raw discovery triple, deriving `identifier`
    /// from `txt["deviceid"]` or falling back to `name:address:port`.
    #[must_use]
    pub fn from_discovery(
        name: String,
        address: Ipv4Addr,
        port: u16,
        txt_record: HashMap<String, String>,
    ) -> Self {
        let identifier = txt_record
            .get("deviceid")
            .cloned()
            .unwrap_or_else(|| format!("{name}:{address}:{port}"));
        let model = txt_record.get("model").cloned();
        Self {
            identifier,
            name,
            address,
            port,
            model,
            properties: txt_record,
        }
    }

    /// Best-effort classification used to filter `scan()` results.
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        let model = self.model.as_deref().unwrap_or_default().to_ascii_lowercase();
        if model.contains("appletv") || model.contains("atv") {
            DeviceKind::AppleTv
        } else if model.contains("audioaccessory") || model.contains("homepod") {
            DeviceKind::HomePod
        } else {
            DeviceKind::Unknown
        }
    }
}
