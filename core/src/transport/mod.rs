// Transport — delivering messages between overlay nodes

pub mod abstraction;
pub mod local;

pub use abstraction::{MessageHandler, Transport, TransportError};
pub use local::LocalTransport;
