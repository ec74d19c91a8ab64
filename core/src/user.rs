// User nodes — origin and final recipient of overlay messages
//
// Sending: fetch the directory, pick a circuit, wrap the message three
// times and hand it to the entry relay. Receiving: whatever arrives at
// the user's address is already plaintext.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::directory::{Directory, DirectoryError};
use crate::privacy::{build_layered_envelope, select_circuit, Circuit, CircuitError, OnionError};
use crate::topology::{NodeAddress, Topology};
use crate::transport::{MessageHandler, Transport, TransportError};

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Circuit error: {0}")]
    Circuit(#[from] CircuitError),
    #[error("Onion error: {0}")]
    Onion(#[from] OnionError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Last messages seen by a user; diagnostics only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserObservation {
    pub last_received_message: Option<String>,
    pub last_sent_message: Option<String>,
    /// Relay ids of the most recent circuit, entry first
    pub last_circuit: Option<Vec<u32>>,
}

pub struct UserNode {
    user_id: u32,
    topology: Topology,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    observation: RwLock<UserObservation>,
}

impl std::fmt::Debug for UserNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserNode")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl UserNode {
    pub fn new(
        user_id: u32,
        topology: Topology,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            user_id,
            topology,
            directory,
            transport,
            observation: RwLock::new(UserObservation::default()),
        }
    }

    pub fn user_id(&self) -> u32 {
        self.user_id
    }

    pub fn address(&self) -> NodeAddress {
        self.topology.user_address(self.user_id)
    }

    pub fn observation(&self) -> UserObservation {
        self.observation.read().clone()
    }

    /// Send `message` to user `destination_id` over a freshly selected circuit.
    ///
    /// Returns the circuit that was used. Success means the entry relay
    /// accepted the envelope; there is no end-to-end acknowledgement.
    pub async fn send_message(
        &self,
        message: &str,
        destination_id: u32,
    ) -> Result<Circuit, SendError> {
        let relays = self.directory.list().await?;
        let circuit = select_circuit(&relays)?;
        self.send_over(&circuit, message, destination_id).await?;
        Ok(circuit)
    }

    /// Send over a caller-chosen circuit
    pub async fn send_over(
        &self,
        circuit: &Circuit,
        message: &str,
        destination_id: u32,
    ) -> Result<(), SendError> {
        let destination = self.topology.user_address(destination_id);
        let envelope = build_layered_envelope(circuit, &self.topology, destination, message)?;
        let entry = self.topology.relay_address(circuit.entry().id);

        {
            let mut observation = self.observation.write();
            observation.last_sent_message = Some(message.to_string());
            observation.last_circuit = Some(circuit.relay_ids());
        }

        tracing::info!(
            "User {}: sending to user {} via {:?}",
            self.user_id,
            destination_id,
            circuit.relay_ids()
        );
        self.transport.deliver(entry, envelope.encode()).await?;
        Ok(())
    }

    /// Accept a plaintext message from an exit relay
    pub fn receive(&self, message: String) {
        tracing::info!("User {}: received {} bytes", self.user_id, message.len());
        self.observation.write().last_received_message = Some(message);
    }
}

#[async_trait]
impl MessageHandler for UserNode {
    async fn handle_message(&self, message: String) -> anyhow::Result<()> {
        self.receive(message);
        Ok(())
    }
}
