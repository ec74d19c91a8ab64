// Privacy — onion routing over fixed three-hop circuits
//
// Provides circuit selection, the envelope codec, and layered
// construction/peeling of onion envelopes.

pub mod circuit;
pub mod envelope;
pub mod onion;

pub use circuit::{select_circuit, select_circuit_with_rng, Circuit, CircuitError, HOP_COUNT};
pub use envelope::{DecryptedPayload, Envelope, EnvelopeError, WRAPPED_KEY_LEN};
pub use onion::{build_layered_envelope, open_layer, peel_layer, unwrap_layer_key, OnionError};
