//! Encryption layer for the Orbit vault.
//!
//! Provides:
//! - Argon2id key derivation from passphrases
//! - ChaCha20-Poly1305 authenticated encryption of JSON values
//! - Key material handling with zeroization
//!
//! Keys derived here never touch durable storage. The vault holds a
//! [`DerivedKey`] in memory for the lifetime of an unlocked session and
//! drops it on lock; everything written to disk is an [`EncryptedRecord`]
//! whose Poly1305 tag makes tampering and wrong-key reads detectable.

mod cipher;
mod error;
mod key;

pub use cipher::{
    decrypt, decrypt_json, encrypt, encrypt_json, EncryptedRecord, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
