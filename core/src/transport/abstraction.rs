//! Transport abstraction layer
//!
//! Point-to-point request/response delivery between overlay nodes. A
//! delivery completes only once the receiving node has finished handling
//! the message, so a relay's forward blocks on everything downstream.

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::{NodeAddress, TopologyError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("No route to {0}")]
    Unroutable(NodeAddress),
    #[error("Invalid address: {0}")]
    Address(#[from] TopologyError),
    #[error("Connection to {address} failed: {reason}")]
    ConnectionFailed { address: NodeAddress, reason: String },
    #[error("{address} rejected the message: {reason}")]
    Rejected { address: NodeAddress, reason: String },
}

/// Outbound side: deliver a message body to a node
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, to: NodeAddress, message: String) -> Result<(), TransportError>;
}

/// Inbound side: whatever sits behind an address
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: String) -> anyhow::Result<()>;
}
