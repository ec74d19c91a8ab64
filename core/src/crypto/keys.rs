// Key material — RSA relay identities and per-hop AES keys
//
// Every key crosses the wire as base64 text:
// - RSA public keys:  base64(SPKI DER)
// - RSA private keys: base64(PKCS#8 DER)
// - AES keys:         base64(raw 32 bytes)

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::CryptoError;

/// Relay key size in bits.
pub const RSA_KEY_BITS: usize = 2048;

/// Size of an AES-256 key (bytes)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Long-lived RSA key pair owned by a relay.
#[derive(Clone)]
pub struct KeyPair {
    public_key: RsaPublicKey,
    private_key: RsaPrivateKey,
}

impl KeyPair {
    /// Generate a fresh 2048-bit key pair (public exponent 65537).
    pub fn generate() -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Public half in directory format
    pub fn export_public(&self) -> Result<String, CryptoError> {
        export_public_key(&self.public_key)
    }

    /// Private half in PKCS#8 form. Only introspection routes should call this.
    pub fn export_private(&self) -> Result<String, CryptoError> {
        export_private_key(&self.private_key)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

pub fn export_public_key(key: &RsaPublicKey) -> Result<String, CryptoError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

pub fn import_public_key(encoded: &str) -> Result<RsaPublicKey, CryptoError> {
    let der = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| CryptoError::KeyEncoding(e.to_string()))
}

pub fn export_private_key(key: &RsaPrivateKey) -> Result<String, CryptoError> {
    let der = key
        .to_pkcs8_der()
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    Ok(BASE64.encode(der.as_bytes()))
}

pub fn import_private_key(encoded: &str) -> Result<RsaPrivateKey, CryptoError> {
    let mut der = BASE64
        .decode(encoded.trim())
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    let key = RsaPrivateKey::from_pkcs8_der(&der)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()));
    der.zeroize();
    key
}

/// Single-use AES-256 key. One is generated per hop per circuit.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_SIZE]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SYMMETRIC_KEY_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Rebuild a key from raw bytes (e.g. after RSA unwrapping)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; SYMMETRIC_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SYMMETRIC_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }

    pub fn export(&self) -> String {
        BASE64.encode(self.0)
    }

    pub fn import(encoded: &str) -> Result<Self, CryptoError> {
        let mut bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let key = Self::from_bytes(&bytes);
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{rsa_decrypt, rsa_encrypt};
    use rsa::traits::PublicKeyParts;

    #[test]
    fn test_generate_key_pair_size() {
        let keys = KeyPair::generate().unwrap();
        assert_eq!(keys.public_key().size(), RSA_KEY_BITS / 8);
    }

    #[test]
    fn test_public_key_export_import_is_functional() {
        let keys = KeyPair::generate().unwrap();
        let exported = keys.export_public().unwrap();
        let imported = import_public_key(&exported).unwrap();

        assert_eq!(&imported, keys.public_key());

        let ciphertext = rsa_encrypt(b"key material", &imported).unwrap();
        let plaintext = rsa_decrypt(&ciphertext, keys.private_key()).unwrap();
        assert_eq!(plaintext, b"key material");
    }

    #[test]
    fn test_private_key_export_import_is_functional() {
        let keys = KeyPair::generate().unwrap();
        let exported = keys.export_private().unwrap();
        let imported = import_private_key(&exported).unwrap();

        let ciphertext = rsa_encrypt(b"abc", keys.public_key()).unwrap();
        assert_eq!(rsa_decrypt(&ciphertext, &imported).unwrap(), b"abc");
    }

    #[test]
    fn test_import_garbage_public_key() {
        assert!(matches!(
            import_public_key("not base64 !!"),
            Err(CryptoError::KeyEncoding(_))
        ));
        assert!(matches!(
            import_public_key("AAAA"),
            Err(CryptoError::KeyEncoding(_))
        ));
    }

    #[test]
    fn test_symmetric_key_export_import() {
        let key = SymmetricKey::generate();
        let exported = key.export();
        assert_eq!(exported.len(), 44);

        let imported = SymmetricKey::import(&exported).unwrap();
        assert_eq!(imported, key);
    }

    #[test]
    fn test_symmetric_keys_are_fresh() {
        assert_ne!(SymmetricKey::generate(), SymmetricKey::generate());
    }

    #[test]
    fn test_symmetric_key_wrong_length() {
        let err = SymmetricKey::from_bytes(&[0u8; 16]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = SymmetricKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(format!("{:?}", key), "SymmetricKey(..)");
    }
}
