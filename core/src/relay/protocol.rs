//! Overlay wire protocol — request/response bodies and route names
//!
//! Every body is JSON with camelCase field names. Bodies are parsed into
//! these structs at the service boundary; anything that does not match is
//! rejected there with a [`ProtocolError`] instead of failing deep inside
//! the decryption path.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::directory::RelayRecord;

/// Body of every liveness probe response
pub const STATUS_LIVE: &str = "live";

/// Route paths shared by the services and their clients
pub mod routes {
    pub const STATUS: &str = "/status";

    // Registry
    pub const REGISTER_NODE: &str = "/registerNode";
    pub const NODE_REGISTRY: &str = "/getNodeRegistry";

    // Relays and users
    pub const MESSAGE: &str = "/message";

    // Relay introspection
    pub const LAST_RECEIVED_ENCRYPTED: &str = "/getLastReceivedEncryptedMessage";
    pub const LAST_RECEIVED_DECRYPTED: &str = "/getLastReceivedDecryptedMessage";
    pub const LAST_DESTINATION: &str = "/getLastMessageDestination";
    pub const PRIVATE_KEY: &str = "/getPrivateKey";

    // Users
    pub const SEND_MESSAGE: &str = "/sendMessage";
    pub const LAST_RECEIVED_MESSAGE: &str = "/getLastReceivedMessage";
    pub const LAST_SENT_MESSAGE: &str = "/getLastSentMessage";
    pub const LAST_CIRCUIT: &str = "/getLastCircuit";
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

/// `POST /registerNode`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterNodeRequest {
    pub id: u32,
    pub public_key: String,
}

impl From<RegisterNodeRequest> for RelayRecord {
    fn from(request: RegisterNodeRequest) -> Self {
        RelayRecord::new(request.id, request.public_key)
    }
}

impl From<RelayRecord> for RegisterNodeRequest {
    fn from(record: RelayRecord) -> Self {
        Self {
            id: record.id,
            public_key: record.public_key,
        }
    }
}

/// `GET /getNodeRegistry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistryResponse {
    pub relays: Vec<RelayRecord>,
}

/// `POST /sendMessage` on a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: String,
    pub destination_id: u32,
}

/// `POST /message` on a relay or user: an envelope, or plaintext at the end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub message: String,
}

/// Introspection routes answer `{"result": value-or-null}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultResponse<T> {
    pub result: Option<T>,
}

impl<T> ResultResponse<T> {
    pub fn new(result: Option<T>) -> Self {
        Self { result }
    }
}

/// Outcome of a mutating request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Parse a request body into its schema
pub fn parse_request<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(body).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
}
