// Envelope codec — wire form of one onion layer
//
// Envelope (one layer, as transmitted):
//   [wrapped key: WRAPPED_KEY_LEN base64 chars][ciphertext: base64, variable]
// No delimiter; the key segment width is fixed by the RSA modulus size.
//
// Decrypted payload (plaintext of the ciphertext segment):
//   [next hop: 10 ASCII digits][remainder: inner envelope or final message]

use thiserror::Error;

use crate::crypto::RSA_KEY_BITS;
use crate::topology::{NodeAddress, TopologyError, ADDRESS_WIDTH};

/// Length of standard padded base64 for `len` input bytes
pub const fn base64_len(len: usize) -> usize {
    (len + 2) / 3 * 4
}

/// Width of the wrapped-key segment: base64 of one RSA modulus-sized block.
/// 344 characters for 2048-bit keys.
pub const WRAPPED_KEY_LEN: usize = base64_len(RSA_KEY_BITS / 8);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Envelope too short: {0} chars")]
    TooShort(usize),
    #[error("Envelope is not ASCII")]
    NotAscii,
    #[error("Wrapped key segment must be {expected} chars, got {actual}")]
    InvalidKeySegment { expected: usize, actual: usize },
    #[error("Invalid next hop: {0}")]
    InvalidNextHop(#[from] TopologyError),
    #[error("Payload remainder is not valid UTF-8")]
    InvalidRemainder,
}

/// One layer as carried between hops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// RSA-wrapped layer key, base64
    pub wrapped_key: String,
    /// `iv || AES-CBC ciphertext`, base64
    pub ciphertext: String,
}

impl Envelope {
    pub fn new(wrapped_key: String, ciphertext: String) -> Result<Self, EnvelopeError> {
        if wrapped_key.len() != WRAPPED_KEY_LEN {
            return Err(EnvelopeError::InvalidKeySegment {
                expected: WRAPPED_KEY_LEN,
                actual: wrapped_key.len(),
            });
        }
        Ok(Self {
            wrapped_key,
            ciphertext,
        })
    }

    /// Concatenate both segments into the transmitted string
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.wrapped_key.len() + self.ciphertext.len());
        out.push_str(&self.wrapped_key);
        out.push_str(&self.ciphertext);
        out
    }

    /// Split a transmitted string at the fixed key width
    pub fn decode(message: &str) -> Result<Self, EnvelopeError> {
        if !message.is_ascii() {
            return Err(EnvelopeError::NotAscii);
        }
        if message.len() <= WRAPPED_KEY_LEN {
            return Err(EnvelopeError::TooShort(message.len()));
        }
        let (wrapped_key, ciphertext) = message.split_at(WRAPPED_KEY_LEN);
        Ok(Self {
            wrapped_key: wrapped_key.to_string(),
            ciphertext: ciphertext.to_string(),
        })
    }
}

/// What a relay learns after removing its layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    pub next_hop: NodeAddress,
    /// Inner envelope for relays, or the original message at the exit hop
    pub remainder: String,
}

impl DecryptedPayload {
    pub fn new(next_hop: NodeAddress, remainder: impl Into<String>) -> Self {
        Self {
            next_hop,
            remainder: remainder.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(ADDRESS_WIDTH + self.remainder.len());
        body.extend_from_slice(self.next_hop.encode().as_bytes());
        body.extend_from_slice(self.remainder.as_bytes());
        body
    }

    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        if body.len() < ADDRESS_WIDTH {
            return Err(EnvelopeError::TooShort(body.len()));
        }
        let (address, remainder) = body.split_at(ADDRESS_WIDTH);
        let next_hop = NodeAddress::decode(address)?;
        let remainder =
            String::from_utf8(remainder.to_vec()).map_err(|_| EnvelopeError::InvalidRemainder)?;
        Ok(Self {
            next_hop,
            remainder,
        })
    }
}
