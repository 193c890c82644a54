//! Authenticated encryption: ChaCha20-Poly1305 over serialized JSON values.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// ChaCha20-Poly1305 nonce length in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag length in bytes.
pub const TAG_SIZE: usize = 16;

/// Storable form of an encrypted value: a fresh random nonce plus the
/// ciphertext (which carries the Poly1305 tag at its tail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedRecord {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

const DECRYPT_FAILED: &str = "authentication failed (wrong key or tampered data)";

/// Encrypts raw bytes under the derived key.
///
/// Every call draws a fresh random nonce — encrypting the same plaintext
/// twice never produces the same record.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedRecord> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedRecord { nonce, ciphertext })
}

/// Decrypts a record, verifying the authentication tag.
pub fn decrypt(key: &DerivedKey, record: &EncryptedRecord) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(Nonce::from_slice(&record.nonce), record.ciphertext.as_slice())
        .map_err(|_| CryptoError::Decryption(DECRYPT_FAILED.to_string()))
}

/// Serializes a JSON value and encrypts it.
pub fn encrypt_json(key: &DerivedKey, value: &serde_json::Value) -> CryptoResult<EncryptedRecord> {
    let plaintext = serde_json::to_vec(value)?;
    encrypt(key, &plaintext)
}

/// Decrypts a record and deserializes the plaintext as JSON.
///
/// A payload that fails to parse after decryption reports the same
/// `Decryption` error as a failed tag.
pub fn decrypt_json(key: &DerivedKey, record: &EncryptedRecord) -> CryptoResult<serde_json::Value> {
    let plaintext = decrypt(key, record)?;
    serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Decryption(DECRYPT_FAILED.to_string()))
}
