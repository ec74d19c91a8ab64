// Cryptography module — relay key pairs and the hybrid layer cipher

pub mod encrypt;
pub mod keys;

use thiserror::Error;

pub use encrypt::{
    key_fingerprint, max_oaep_payload, rsa_decrypt, rsa_encrypt, sym_decrypt, sym_encrypt, IV_SIZE,
};
pub use keys::{
    export_private_key, export_public_key, import_private_key, import_public_key, KeyPair,
    SymmetricKey, RSA_KEY_BITS, SYMMETRIC_KEY_SIZE,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),
    #[error("Key encoding error: {0}")]
    KeyEncoding(String),
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("Encryption failed: {0}")]
    Encryption(String),
    #[error("Decryption failed: {0}")]
    Decryption(String),
}
