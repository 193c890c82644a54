//! Encrypted vault for Orbit user data.
//!
//! A [`Vault`] wraps any [`orbit_storage::BlobStore`] with a passphrase
//! lifecycle: derive an Argon2id key from a passphrase + stored salt,
//! verify it against an encrypted token, and encrypt every logical value
//! with ChaCha20-Poly1305 before it touches the store. The derived key
//! exists only in the unlocked session and zeroizes on lock.
//!
//! State machine: `Uninitialized → (initialize) → Unlocked`,
//! `Locked ⇄ Unlocked` via `unlock`/`lock`, and `destroy` collapses any
//! state back to `Uninitialized` by wiping the store.
//!
//! The [`legacy`] module handles the one-time migration from the flat
//! plaintext `socialOrbit_*` key-value format that predates the vault.

mod error;
pub mod legacy;
mod vault;

pub use error::{VaultError, VaultResult};
pub use vault::{
    ItemRead, Vault, VaultConfig, VaultExport, VaultState, MIN_PASSPHRASE_LEN,
};
