//! Versioned AES-256-GCM encryption for secrets at rest.
//!
//! Stored format: `base64(version || nonce || ciphertext || auth_tag)` where
//! `version` is a single byte selecting the master key. Encryption always
//! uses the current version; decryption selects the key by the stored byte,
//! so readers tolerate old and new ciphertexts during a rotation window.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::HashMap;
use thiserror::Error;

/// Nonce size for AES-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (32 bytes).
const KEY_SIZE: usize = 32;

/// Errors from encryption and decryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {KEY_SIZE} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid hex key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Unknown key version: {0}")]
    UnknownKeyVersion(u8),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

/// A versioned set of 32-byte master keys.
///
/// The ring always has exactly one *current* version used for new
/// ciphertexts; older versions remain readable until their rows have been
/// re-encrypted.
#[derive(Clone)]
pub struct KeyRing {
    current: u8,
    keys: HashMap<u8, [u8; KEY_SIZE]>,
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never appears in debug output.
        f.debug_struct("KeyRing")
            .field("current", &self.current)
            .field("versions", &self.keys.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl KeyRing {
    /// Create a keyring with a single key at version 1 from a 64-char hex string.
    pub fn from_hex(master_key_hex: &str) -> Result<Self, CryptoError> {
        let mut keys = HashMap::new();
        keys.insert(1, decode_key(master_key_hex)?);
        Ok(Self { current: 1, keys })
    }

    /// Create a keyring from `(version, hex key)` pairs with an explicit
    /// current version.
    pub fn from_versions(
        current: u8,
        versions: &[(u8, String)],
    ) -> Result<Self, CryptoError> {
        let mut keys = HashMap::new();
        for (version, hex_key) in versions {
            keys.insert(*version, decode_key(hex_key)?);
        }
        if !keys.contains_key(&current) {
            return Err(CryptoError::UnknownKeyVersion(current));
        }
        Ok(Self { current, keys })
    }

    /// The version new ciphertexts are written under.
    #[must_use]
    pub fn current_version(&self) -> u8 {
        self.current
    }

    /// Encrypt a byte string under the current key version.
    ///
    /// Returns `base64(version || nonce || ciphertext || tag)`. A fresh
    /// random nonce is drawn from the OS CSPRNG per call, so encrypting the
    /// same plaintext twice yields distinct ciphertexts.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let key = self
            .keys
            .get(&self.current)
            .ok_or(CryptoError::UnknownKeyVersion(self.current))?;
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        sealed.push(self.current);
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(&sealed))
    }

    /// Encrypt a string value.
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes())
    }

    /// Decrypt a stored value, selecting the key by its version byte.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::DecryptionFailed(format!("base64 decode failed: {e}")))?;

        // version byte + nonce + at least the GCM tag
        if sealed.len() < 1 + NONCE_SIZE + 16 {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext too short".to_string(),
            ));
        }

        let version = sealed[0];
        let key = self
            .keys
            .get(&version)
            .ok_or(CryptoError::UnknownKeyVersion(version))?;

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        let nonce = Nonce::from_slice(&sealed[1..1 + NONCE_SIZE]);
        let ciphertext = &sealed[1 + NONCE_SIZE..];

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Decrypt a stored value into a UTF-8 string.
    pub fn decrypt_str(&self, encoded: &str) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(encoded)?;
        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid UTF-8: {e}")))
    }

    /// Re-encrypt a value under the current version.
    ///
    /// Used by the rotation migration: a no-op rewrite for values already on
    /// the current version would still refresh the nonce, so callers should
    /// check [`Self::stored_version`] first to skip them.
    pub fn reencrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let plaintext = self.decrypt(encoded)?;
        self.encrypt(&plaintext)
    }

    /// Read the version byte of a stored value without decrypting it.
    pub fn stored_version(encoded: &str) -> Result<u8, CryptoError> {
        let sealed = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::DecryptionFailed(format!("base64 decode failed: {e}")))?;
        sealed
            .first()
            .copied()
            .ok_or_else(|| CryptoError::DecryptionFailed("empty ciphertext".to_string()))
    }
}

/// Decode and length-check a 64-char hex key.
fn decode_key(hex_key: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength(bytes.len()));
    }
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Generate a random master key, hex-encoded (for operator tooling).
#[must_use]
pub fn generate_master_key_hex() -> String {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ring() -> KeyRing {
        KeyRing::from_hex(&hex::encode([0x42u8; 32])).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let ring = test_ring();
        let plaintext = b"ya29.a0AfH6SMBx-access-token";

        let sealed = ring.encrypt(plaintext).unwrap();
        let opened = ring.decrypt(&sealed).unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_roundtrip_large_value() {
        let ring = test_ring();
        let plaintext = vec![0xA5u8; 8 * 1024];

        let sealed = ring.encrypt(&plaintext).unwrap();
        assert_eq!(ring.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_distinct_ciphertexts_for_same_plaintext() {
        let ring = test_ring();

        let a = ring.encrypt(b"same secret").unwrap();
        let b = ring.encrypt(b"same secret").unwrap();

        // Random nonces make the sealed values differ.
        assert_ne!(a, b);
        assert_eq!(ring.decrypt(&a).unwrap(), ring.decrypt(&b).unwrap());
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let ring = test_ring();
        let sealed = ring.encrypt_str("").unwrap();
        assert_eq!(ring.decrypt_str(&sealed).unwrap(), "");
    }

    #[test]
    fn test_version_byte_is_current() {
        let ring = test_ring();
        let sealed = ring.encrypt(b"x").unwrap();
        assert_eq!(KeyRing::stored_version(&sealed).unwrap(), 1);
    }

    #[test]
    fn test_rotation_old_version_still_readable() {
        let old_key = hex::encode([0x01u8; 32]);
        let new_key = hex::encode([0x02u8; 32]);

        let old_ring = KeyRing::from_versions(1, &[(1, old_key.clone())]).unwrap();
        let sealed_v1 = old_ring.encrypt(b"refresh-token").unwrap();

        // After rotation the ring carries both keys, current = 2.
        let rotated =
            KeyRing::from_versions(2, &[(1, old_key), (2, new_key)]).unwrap();

        assert_eq!(rotated.decrypt(&sealed_v1).unwrap(), b"refresh-token");

        let resealed = rotated.reencrypt(&sealed_v1).unwrap();
        assert_eq!(KeyRing::stored_version(&resealed).unwrap(), 2);
        assert_eq!(rotated.decrypt(&resealed).unwrap(), b"refresh-token");
    }

    #[test]
    fn test_unknown_version_rejected() {
        let ring = test_ring();
        let sealed = ring.encrypt(b"x").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        raw[0] = 9;
        let tampered = BASE64.encode(&raw);

        match ring.decrypt(&tampered) {
            Err(CryptoError::UnknownKeyVersion(9)) => {}
            other => panic!("expected UnknownKeyVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let ring = test_ring();
        let sealed = ring.encrypt(b"secret").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = BASE64.encode(&raw);

        assert!(ring.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let ring_a = KeyRing::from_hex(&hex::encode([0x01u8; 32])).unwrap();
        let ring_b = KeyRing::from_hex(&hex::encode([0x02u8; 32])).unwrap();

        let sealed = ring_a.encrypt(b"secret").unwrap();
        assert!(ring_b.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_invalid_key_length() {
        let result = KeyRing::from_hex(&hex::encode([0u8; 16]));
        assert!(matches!(result, Err(CryptoError::InvalidKeyLength(16))));
    }

    #[test]
    fn test_invalid_hex_key() {
        assert!(KeyRing::from_hex("not hex at all").is_err());
    }

    #[test]
    fn test_ciphertext_too_short() {
        let ring = test_ring();
        let short = BASE64.encode([1u8; 8]);
        assert!(ring.decrypt(&short).is_err());
    }

    #[test]
    fn test_generated_key_is_usable() {
        let ring = KeyRing::from_hex(&generate_master_key_hex()).unwrap();
        let sealed = ring.encrypt(b"ok").unwrap();
        assert_eq!(ring.decrypt(&sealed).unwrap(), b"ok");
    }
}
