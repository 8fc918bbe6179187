//! Persisted long-term credentials (§3 Credentials record, §6 file format).
//!
//! A record is valid only if `identifier`, `client_ltpk`, and `server_ltpk`
//! are all present and each key is 32 raw bytes (Ed25519). Writes are
//! atomic: a temp file is written in the store's directory, `fsync`'d, then
//! renamed over the target, so a process killed mid-write leaves either the
//! previous valid record or the new one — never a partial file.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::HapError;

/// Ed25519 long-term keys for one paired device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsRecord {
    pub identifier: String,
    #[serde(with = "base64_bytes")]
    pub client_ltpk: Vec<u8>,
    #[serde(rename = "Companion")]
    #[serde(with = "base64_bytes")]
    pub server_ltpk: Vec<u8>,
}

impl CredentialsRecord {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.client_ltpk.len() == 32 && self.server_ltpk.len() == 32
    }
}

mod base64_bytes {
    use super::{Engine as _, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Injected credential store interface (§6, consumed collaborator): `get`,
/// `put`, `delete`, keyed by device identifier.
pub trait CredentialStore: Send + Sync {
    fn get(&self, identifier: &str) -> Result<Option<CredentialsRecord>, HapError>;
    fn put(&self, record: CredentialsRecord) -> Result<(), HapError>;
    fn delete(&self, identifier: &str) -> Result<(), HapError>;
}

/// A single JSON document per device directory: an array of
/// `{deviceName, credentials, lastConnected}` entries keyed by
/// `credentials.identifier`, matching the multi-device form in §6.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(rename = "deviceName")]
    device_name: String,
    credentials: CredentialsRecord,
    #[serde(rename = "lastConnected")]
    last_connected: String,
}

/// JSON-file-backed [`CredentialStore`], the crate's only first-party
/// implementation. One file holds every paired device.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, StoredEntry>, HapError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => Ok(serde_json::from_slice(&bytes)?),
            _ => Ok(HashMap::new()),
        }
    }

    fn store_atomic(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), HapError> {
        let serialized = serde_json::to_vec_pretty(entries)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_path = dir.join(format!(
            ".{}.tmp",
            self.path.file_name().and_then(|f| f.to_str()).unwrap_or("credentials")
        ));
        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            std::io::Write::write_all(&mut tmp, &serialized)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, identifier: &str) -> Result<Option<CredentialsRecord>, HapError> {
        let entries = self.load()?;
        Ok(entries.get(identifier).map(|e| e.credentials.clone()))
    }

    fn put(&self, record: CredentialsRecord) -> Result<(), HapError> {
        let mut entries = self.load()?;
        let identifier = record.identifier.clone();
        entries.insert(
            identifier.clone(),
            StoredEntry {
                device_name: identifier,
                credentials: record,
                last_connected: String::new(),
            },
        );
        self.store_atomic(&entries)
    }

    fn delete(&self, identifier: &str) -> Result<(), HapError> {
        let mut entries = self.load()?;
        entries.remove(identifier);
        self.store_atomic(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> CredentialsRecord {
        CredentialsRecord {
            identifier: id.to_string(),
            client_ltpk: vec![1u8; 32],
            server_ltpk: vec![2u8; 32],
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.put(sample("dev-1")).unwrap();
        let fetched = store.get("dev-1").unwrap().unwrap();
        assert_eq!(fetched, sample("dev-1"));
        assert!(fetched.is_valid());
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("credentials.json"));
        store.put(sample("dev-1")).unwrap();
        store.delete("dev-1").unwrap();
        assert!(store.get("dev-1").unwrap().is_none());
    }

    #[test]
    fn missing_file_reads_as_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("missing.json"));
        assert!(store.get("dev-1").unwrap().is_none());
    }
}
