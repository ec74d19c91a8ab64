// Onion Relay Core — layered encryption over fixed three-hop circuits
//
// A user wraps a message once per relay, innermost layer for the exit.
// Each relay peels one layer, learns only the next address, and forwards.
// No relay other than the exit ever sees the plaintext, and only the
// entry relay knows who sent it.

pub mod crypto;
pub mod directory;
pub mod privacy;
pub mod relay;
pub mod topology;
pub mod transport;
pub mod user;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub use crypto::{CryptoError, KeyPair, SymmetricKey};
pub use directory::{Directory, DirectoryError, MemoryDirectory, RelayRecord};
pub use privacy::{Circuit, CircuitError, Envelope, OnionError};
pub use relay::{OnionRouter, RelayError};
pub use topology::{NodeAddress, Topology};
pub use transport::{LocalTransport, MessageHandler, Transport, TransportError};
pub use user::{SendError, UserNode};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("Relay {0} already exists")]
    DuplicateRelay(u32),
    #[error("User {0} already exists")]
    DuplicateUser(u32),
    #[error("Address {0} is already in use")]
    AddressInUse(NodeAddress),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

// ============================================================================
// IN-PROCESS OVERLAY
// ============================================================================

/// A complete overlay wired over [`LocalTransport`] and [`MemoryDirectory`].
///
/// Nodes come up the same way the networked services do: a relay
/// generates its key pair, registers with the directory, then becomes
/// reachable at its address.
///
/// The overlay owns its nodes. The transport only holds weak handles, so
/// dropping the last clone of the overlay frees every node.
#[derive(Clone)]
pub struct LocalOverlay {
    topology: Topology,
    directory: Arc<MemoryDirectory>,
    transport: Arc<LocalTransport>,
    relays: Arc<RwLock<HashMap<u32, Arc<OnionRouter>>>>,
    users: Arc<RwLock<HashMap<u32, Arc<UserNode>>>>,
}

impl Default for LocalOverlay {
    fn default() -> Self {
        Self::new(Topology::default())
    }
}

impl LocalOverlay {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            directory: Arc::new(MemoryDirectory::new()),
            transport: Arc::new(LocalTransport::new()),
            relays: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn directory(&self) -> Arc<MemoryDirectory> {
        self.directory.clone()
    }

    pub fn transport(&self) -> Arc<LocalTransport> {
        self.transport.clone()
    }

    /// Generate keys for relay `id`, register it and bind its address
    pub async fn add_relay(&self, id: u32) -> Result<Arc<OnionRouter>, OverlayError> {
        if self.relays.read().contains_key(&id) {
            return Err(OverlayError::DuplicateRelay(id));
        }
        let address = self.topology.relay_address(id);
        self.ensure_free(address)?;

        let keys = KeyPair::generate()?;
        let router = Arc::new(OnionRouter::new(id, keys, self.transport.clone()));
        self.directory
            .register(RelayRecord::new(id, router.public_key()?))
            .await?;
        self.transport.bind(address, router.clone());
        self.relays.write().insert(id, router.clone());

        tracing::info!("Relay {} up at {}", id, address);
        Ok(router)
    }

    pub fn add_user(&self, id: u32) -> Result<Arc<UserNode>, OverlayError> {
        if self.users.read().contains_key(&id) {
            return Err(OverlayError::DuplicateUser(id));
        }
        self.ensure_free(self.topology.user_address(id))?;

        let user = Arc::new(UserNode::new(
            id,
            self.topology.clone(),
            self.directory.clone(),
            self.transport.clone(),
        ));
        self.transport.bind(user.address(), user.clone());
        self.users.write().insert(id, user.clone());
        Ok(user)
    }

    /// Relay and user ranges can overlap; one address, one node
    fn ensure_free(&self, address: NodeAddress) -> Result<(), OverlayError> {
        if self.transport.is_bound(address) {
            return Err(OverlayError::AddressInUse(address));
        }
        Ok(())
    }

    pub fn relay(&self, id: u32) -> Option<Arc<OnionRouter>> {
        self.relays.read().get(&id).cloned()
    }

    pub fn user(&self, id: u32) -> Option<Arc<UserNode>> {
        self.users.read().get(&id).cloned()
    }

    /// Take a relay off the overlay. Its directory entry stays behind.
    pub fn remove_relay(&self, id: u32) -> Option<Arc<OnionRouter>> {
        self.transport.unbind(self.topology.relay_address(id));
        self.relays.write().remove(&id)
    }
}
