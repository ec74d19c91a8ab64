// Relay directory — who is in the overlay and which key they hold
//
// Pure lookup/insert. Registrations are appended unconditionally: the same
// id may appear several times and nothing authenticates the published key.
// Circuit selection copes with repeats; nothing here tries to.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A relay as published in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRecord {
    pub id: u32,
    /// base64(SPKI DER) RSA public key
    pub public_key: String,
}

impl RelayRecord {
    pub fn new(id: u32, public_key: impl Into<String>) -> Self {
        Self {
            id,
            public_key: public_key.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory unreachable: {0}")]
    Unreachable(String),
    #[error("Directory rejected request: {0}")]
    Rejected(String),
    #[error("Malformed directory response: {0}")]
    MalformedResponse(String),
}

/// Node discovery contract consumed by origins and relays at startup
#[async_trait]
pub trait Directory: Send + Sync {
    /// Publish a relay. No dedup, no verification.
    async fn register(&self, record: RelayRecord) -> Result<(), DirectoryError>;

    /// Snapshot of every registration so far
    async fn list(&self) -> Result<Vec<RelayRecord>, DirectoryError>;
}

/// In-process directory, also the backing store of the registry service
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    records: RwLock<Vec<RelayRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn register(&self, record: RelayRecord) -> Result<(), DirectoryError> {
        tracing::debug!("Registering relay {}", record.id);
        self.records.write().push(record);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RelayRecord>, DirectoryError> {
        Ok(self.records.read().clone())
    }
}
