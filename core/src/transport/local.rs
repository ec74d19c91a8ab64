//! In-process transport
//!
//! Routes deliveries straight to registered handlers. Used for tests and
//! for running a whole overlay inside one process without sockets.
//!
//! Handlers are held weakly. Relays and users keep an `Arc` to the
//! transport themselves, so whoever binds a handler must also own it.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::abstraction::{MessageHandler, Transport, TransportError};
use crate::topology::NodeAddress;

#[derive(Default)]
pub struct LocalTransport {
    handlers: RwLock<HashMap<NodeAddress, Weak<dyn MessageHandler>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a handler to an address, replacing any previous one.
    /// The address goes dead once the last `Arc` to the handler is dropped.
    pub fn bind(&self, address: NodeAddress, handler: Arc<dyn MessageHandler>) {
        self.handlers.write().insert(address, Arc::downgrade(&handler));
    }

    pub fn unbind(&self, address: NodeAddress) {
        self.handlers.write().remove(&address);
    }

    pub fn is_bound(&self, address: NodeAddress) -> bool {
        self.handlers
            .read()
            .get(&address)
            .map_or(false, |handler| handler.strong_count() > 0)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn deliver(&self, to: NodeAddress, message: String) -> Result<(), TransportError> {
        // Upgrade out of the lock so it is not held across the await
        let handler = self
            .handlers
            .read()
            .get(&to)
            .and_then(Weak::upgrade)
            .ok_or(TransportError::Unroutable(to))?;

        tracing::trace!("Local delivery to {} ({} bytes)", to, message.len());
        handler
            .handle_message(message)
            .await
            .map_err(|e| TransportError::Rejected {
                address: to,
                reason: e.to_string(),
            })
    }
}
