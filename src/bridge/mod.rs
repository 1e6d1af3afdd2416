//! Secret-holding backend bridge
//!
//! The runtime never touches secrets, cryptography or persistence; all of
//! that lives behind this trait. The bridge is an opaque async round trip
//! with a success/failure outcome and a scalar payload.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod mock;

pub use mock::MockSecretBridge;

/// Opaque identifier for an OTP entry. Identity is by id; names are
/// mutable display labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One OTP entry as listed by the backend store.
///
/// The runtime holds a read-only, process-local copy of these per listing
/// refresh; the backend's store owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier
    pub id: EntryId,

    /// Display label, matched by search
    pub name: String,

    /// Opaque credential reference; never interpreted here
    pub secret: String,
}

/// Interface to the trusted secret-holding service.
///
/// Mutating operations follow the reload convention: the caller performs a
/// full `list_entries` afterwards rather than patching incrementally.
#[async_trait]
pub trait SecretBridge: Send + Sync {
    /// Generate the current code for an entry.
    ///
    /// Fails with `BridgeError::InvalidSecret` when the stored secret
    /// cannot produce a code, `BridgeError::Unavailable` on transport
    /// failure.
    async fn generate_code(&self, id: &EntryId) -> Result<String>;

    /// Full entry-set reload.
    async fn list_entries(&self) -> Result<Vec<Entry>>;

    /// Register a new entry.
    async fn add_entry(&self, name: &str, secret: &str) -> Result<()>;

    /// Remove an entry by id.
    async fn delete_entry(&self, id: &EntryId) -> Result<()>;

    /// Change an entry's display label.
    async fn rename_entry(&self, id: &EntryId, new_name: &str) -> Result<()>;

    /// Extract an OTP secret from a QR image.
    ///
    /// Fails with `BridgeError::Decode` when no valid payload is found.
    /// Consumed only by the add-entry flow, never by the scheduler.
    async fn decode_qr_image(&self, image: &[u8]) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_display() {
        let id = EntryId::new("abc-123");
        assert_eq!(id.to_string(), "abc-123");
        assert_eq!(id.as_str(), "abc-123");
    }

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = Entry {
            id: EntryId::new("id-1"),
            name: "GitHub".to_string(),
            secret: "ref-1".to_string(),
        };

        let json = serde_json::to_string(&entry).expect("serialize");
        assert!(json.contains("\"id\":\"id-1\""));

        let back: Entry = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, entry);
    }
}
