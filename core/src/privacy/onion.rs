// Onion-Layered Relay — nested hybrid encryption over a three-hop circuit
//
// Each layer reveals only the next hop to the relay holding its key,
// so no single relay sees both the origin and the destination.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rsa::RsaPrivateKey;
use thiserror::Error;

use super::circuit::Circuit;
use super::envelope::{DecryptedPayload, Envelope, EnvelopeError};
use crate::crypto::{
    import_public_key, rsa_decrypt, rsa_encrypt, sym_decrypt, sym_encrypt, CryptoError,
    SymmetricKey,
};
use crate::directory::RelayRecord;
use crate::topology::{NodeAddress, Topology};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OnionError {
    #[error("Relay {relay_id} has an unusable public key: {source}")]
    InvalidRelayKey { relay_id: u32, source: CryptoError },
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
    #[error("Invalid base64 segment: {0}")]
    Encoding(String),
}

/// Wrap `plaintext` for delivery to `destination` through `circuit`.
///
/// Layers are built innermost-first, starting at the exit hop:
/// - body = next address (10 digits) || payload
/// - ciphertext = AES-CBC(fresh key, body)
/// - wrapped key = RSA-OAEP(hop key, raw AES key)
/// - payload = wrapped key || ciphertext, next address = this hop
///
/// The returned envelope goes to the entry hop.
pub fn build_layered_envelope(
    circuit: &Circuit,
    topology: &Topology,
    destination: NodeAddress,
    plaintext: &str,
) -> Result<Envelope, OnionError> {
    let mut payload = plaintext.to_string();
    let mut next_address = destination;

    for hop in circuit.hops()[1..].iter().rev() {
        payload = wrap_layer(hop, next_address, payload)?.encode();
        next_address = topology.relay_address(hop.id);
    }

    wrap_layer(circuit.entry(), next_address, payload)
}

/// Seal one layer for `hop`, telling it to forward `payload` to `next_address`
fn wrap_layer(
    hop: &RelayRecord,
    next_address: NodeAddress,
    payload: String,
) -> Result<Envelope, OnionError> {
    let public_key =
        import_public_key(&hop.public_key).map_err(|source| OnionError::InvalidRelayKey {
            relay_id: hop.id,
            source,
        })?;

    let layer_key = SymmetricKey::generate();
    let body = DecryptedPayload::new(next_address, payload).encode();
    let ciphertext = sym_encrypt(&layer_key, &body)?;
    let wrapped_key = rsa_encrypt(layer_key.as_bytes(), &public_key)?;

    Ok(Envelope::new(
        BASE64.encode(wrapped_key),
        BASE64.encode(ciphertext),
    )?)
}

/// Recover this hop's AES key from the wrapped-key segment.
pub fn unwrap_layer_key(
    envelope: &Envelope,
    private_key: &RsaPrivateKey,
) -> Result<SymmetricKey, OnionError> {
    let wrapped = BASE64
        .decode(&envelope.wrapped_key)
        .map_err(|e| OnionError::Encoding(e.to_string()))?;
    let raw_key = rsa_decrypt(&wrapped, private_key)?;
    Ok(SymmetricKey::from_bytes(&raw_key)?)
}

/// Decrypt the ciphertext segment and split off the next hop.
pub fn open_layer(envelope: &Envelope, key: &SymmetricKey) -> Result<DecryptedPayload, OnionError> {
    let blob = BASE64
        .decode(&envelope.ciphertext)
        .map_err(|e| OnionError::Encoding(e.to_string()))?;
    let body = sym_decrypt(key, &blob)?;
    Ok(DecryptedPayload::decode(&body)?)
}

/// Remove exactly one layer from a transmitted envelope
pub fn peel_layer(message: &str, private_key: &RsaPrivateKey) -> Result<DecryptedPayload, OnionError> {
    let envelope = Envelope::decode(message)?;
    let key = unwrap_layer_key(&envelope, private_key)?;
    open_layer(&envelope, &key)
}
