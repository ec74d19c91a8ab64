//! Onion router — the per-relay peel-and-forward state machine
//!
//! ```text
//! AwaitingEnvelope --unwrap key--> KeyRecovered --decrypt--> PayloadDecrypted --deliver--> Forwarded
//!        |                              |                            |
//!        +------------------------------+----------------------------+--> failed (RelayError)
//! ```
//!
//! The router never looks at the directory and does not care whether the
//! next hop is a relay or the final recipient; the address decides.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::crypto::{key_fingerprint, CryptoError, KeyPair, SymmetricKey};
use crate::privacy::{open_layer, unwrap_layer_key, DecryptedPayload, Envelope, EnvelopeError, OnionError};
use crate::topology::NodeAddress;
use crate::transport::{MessageHandler, Transport, TransportError};

/// Stage a message has reached inside the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeelStage {
    AwaitingEnvelope,
    KeyRecovered,
    PayloadDecrypted,
    Forwarded,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(#[source] EnvelopeError),
    #[error("Key recovery failed: {0}")]
    KeyRecovery(#[source] OnionError),
    #[error("Payload decryption failed: {0}")]
    PayloadDecryption(#[source] OnionError),
    #[error("Forward to {address} failed: {source}")]
    Forward {
        address: NodeAddress,
        source: TransportError,
    },
}

impl RelayError {
    /// The last stage reached before the failure
    pub fn failed_at(&self) -> PeelStage {
        match self {
            RelayError::MalformedEnvelope(_) | RelayError::KeyRecovery(_) => {
                PeelStage::AwaitingEnvelope
            }
            RelayError::PayloadDecryption(_) => PeelStage::KeyRecovered,
            RelayError::Forward { .. } => PeelStage::PayloadDecrypted,
        }
    }

    /// True when the request itself was bad, as opposed to a downstream failure
    pub fn is_client_error(&self) -> bool {
        !matches!(self, RelayError::Forward { .. })
    }
}

/// Last thing this relay saw. Diagnostics only; last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayObservation {
    pub last_received_encrypted: Option<String>,
    pub last_received_decrypted: Option<String>,
    pub last_destination: Option<NodeAddress>,
}

enum PeelState {
    AwaitingEnvelope(String),
    KeyRecovered {
        envelope: Envelope,
        key: SymmetricKey,
    },
    PayloadDecrypted(DecryptedPayload),
    Forwarded(NodeAddress),
}

impl PeelState {
    fn stage(&self) -> PeelStage {
        match self {
            PeelState::AwaitingEnvelope(_) => PeelStage::AwaitingEnvelope,
            PeelState::KeyRecovered { .. } => PeelStage::KeyRecovered,
            PeelState::PayloadDecrypted(_) => PeelStage::PayloadDecrypted,
            PeelState::Forwarded(_) => PeelStage::Forwarded,
        }
    }
}

pub struct OnionRouter {
    node_id: u32,
    keys: KeyPair,
    transport: Arc<dyn Transport>,
    observation: RwLock<RelayObservation>,
}

impl OnionRouter {
    pub fn new(node_id: u32, keys: KeyPair, transport: Arc<dyn Transport>) -> Self {
        Self {
            node_id,
            keys,
            transport,
            observation: RwLock::new(RelayObservation::default()),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Public key as published in the directory
    pub fn public_key(&self) -> Result<String, CryptoError> {
        self.keys.export_public()
    }

    /// Exported private key, for the test-only introspection route
    pub fn private_key(&self) -> Result<String, CryptoError> {
        self.keys.export_private()
    }

    pub fn observation(&self) -> RelayObservation {
        self.observation.read().clone()
    }

    /// Peel one layer off `message` and forward the rest.
    ///
    /// Returns the address the remainder was delivered to. The call only
    /// completes once the downstream node has answered.
    pub async fn handle_envelope(&self, message: String) -> Result<NodeAddress, RelayError> {
        let mut state = PeelState::AwaitingEnvelope(message);
        loop {
            if let PeelState::Forwarded(address) = state {
                return Ok(address);
            }
            let from = state.stage();
            state = match self.advance(state).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!("Relay {}: failed at {:?}: {}", self.node_id, from, e);
                    return Err(e);
                }
            };
            tracing::debug!("Relay {}: {:?} -> {:?}", self.node_id, from, state.stage());
        }
    }

    async fn advance(&self, state: PeelState) -> Result<PeelState, RelayError> {
        match state {
            PeelState::AwaitingEnvelope(message) => {
                self.observation.write().last_received_encrypted = Some(message.clone());

                let envelope = Envelope::decode(&message).map_err(RelayError::MalformedEnvelope)?;
                let key = unwrap_layer_key(&envelope, self.keys.private_key())
                    .map_err(RelayError::KeyRecovery)?;
                Ok(PeelState::KeyRecovered { envelope, key })
            }
            PeelState::KeyRecovered { envelope, key } => {
                let payload =
                    open_layer(&envelope, &key).map_err(RelayError::PayloadDecryption)?;

                let mut observation = self.observation.write();
                observation.last_received_decrypted = Some(payload.remainder.clone());
                observation.last_destination = Some(payload.next_hop);
                drop(observation);

                Ok(PeelState::PayloadDecrypted(payload))
            }
            PeelState::PayloadDecrypted(DecryptedPayload {
                next_hop,
                remainder,
            }) => {
                tracing::info!(
                    "Relay {}: forwarding {} bytes to {}",
                    self.node_id,
                    remainder.len(),
                    next_hop
                );
                self.transport
                    .deliver(next_hop, remainder)
                    .await
                    .map_err(|source| RelayError::Forward {
                        address: next_hop,
                        source,
                    })?;
                Ok(PeelState::Forwarded(next_hop))
            }
            forwarded @ PeelState::Forwarded(_) => Ok(forwarded),
        }
    }

    /// Short identifier of this relay's key, safe to log
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        Ok(key_fingerprint(&self.public_key()?))
    }
}

#[async_trait]
impl MessageHandler for OnionRouter {
    async fn handle_message(&self, message: String) -> anyhow::Result<()> {
        self.handle_envelope(message).await?;
        Ok(())
    }
}
