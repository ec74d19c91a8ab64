// Hybrid encryption primitives: RSA-OAEP key wrapping + AES-256-CBC payloads
//
// Flow for one onion layer:
// 1. Generate a fresh AES-256 key
// 2. Encrypt: AES-256-CBC(key, random_iv, body) → iv || ciphertext
// 3. Wrap: RSA-OAEP/SHA-256(hop_public_key, raw_key) → 256-byte blob
//
// Relay reverses:
// 1. Unwrap: RSA-OAEP/SHA-256(private_key, blob) → raw_key
// 2. Decrypt: split iv prefix, AES-256-CBC(raw_key, iv, ciphertext) → body
//
// CBC carries no integrity tag; tampering surfaces as padding or
// downstream parse failures only.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::{CryptoError, SymmetricKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size, which is also the IV length (bytes)
pub const IV_SIZE: usize = 16;

/// SHA-256 digest width, the OAEP hash length (bytes)
const SHA256_OUTPUT_SIZE: usize = 32;

/// Largest plaintext RSA-OAEP/SHA-256 accepts for a key of `modulus_bytes`.
pub const fn max_oaep_payload(modulus_bytes: usize) -> usize {
    modulus_bytes.saturating_sub(2 * SHA256_OUTPUT_SIZE + 2)
}

/// Encrypt small key material for the holder of `public_key`.
///
/// Never pass whole messages here; OAEP has a hard ceiling of
/// `max_oaep_payload(modulus)` bytes (190 for 2048-bit keys).
pub fn rsa_encrypt(plaintext: &[u8], public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let limit = max_oaep_payload(public_key.size());
    if plaintext.len() > limit {
        return Err(CryptoError::Encryption(format!(
            "plaintext of {} bytes exceeds OAEP limit of {} bytes",
            plaintext.len(),
            limit
        )));
    }

    public_key
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Decrypt an OAEP blob. Wrong key, bad padding and truncated input all
/// collapse into `CryptoError::Decryption`.
pub fn rsa_decrypt(ciphertext: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|_| CryptoError::Decryption("RSA-OAEP decryption failed".to_string()))
}

/// Encrypt with a fresh random IV. Returns `iv || ciphertext`.
pub fn sym_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt an `iv || ciphertext` blob produced by [`sym_encrypt`].
pub fn sym_decrypt(key: &SymmetricKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < IV_SIZE * 2 {
        return Err(CryptoError::Decryption(format!(
            "ciphertext too short: {} bytes",
            blob.len()
        )));
    }

    let (iv, ciphertext) = blob.split_at(IV_SIZE);
    if ciphertext.len() % IV_SIZE != 0 {
        return Err(CryptoError::Decryption(
            "ciphertext is not block aligned".to_string(),
        ));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| CryptoError::Decryption(e.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decryption("invalid padding: wrong key or corrupted ciphertext".to_string()))
}

/// SHA-256 fingerprint of an exported public key, for log lines.
pub fn key_fingerprint(exported_public_key: &str) -> String {
    let digest = Sha256::digest(exported_public_key.as_bytes());
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
