//! Onion relays
//!
//! A relay holds one RSA key pair, peels exactly one layer off each
//! envelope it receives and forwards the remainder to the address that
//! layer names. It keeps no per-circuit state.

pub mod protocol;
pub mod router;

pub use protocol::{
    parse_request, routes, DeliverRequest, NodeRegistryResponse, ProtocolError,
    RegisterNodeRequest, ResultResponse, SendMessageRequest, StatusResponse, STATUS_LIVE,
};
pub use router::{OnionRouter, PeelStage, RelayError, RelayObservation};
