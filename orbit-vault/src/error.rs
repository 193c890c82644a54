//! Error types for vault operations.

use orbit_crypto::CryptoError;
use orbit_storage::StorageError;
use thiserror::Error;

/// Convenience alias for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Passphrase fails the minimum-strength rule.
    #[error("passphrase too short (min 4 characters)")]
    WeakPassphrase,

    /// The verification token did not decrypt under the derived key.
    #[error("incorrect passphrase")]
    IncorrectPassphrase,

    /// A guarded operation ran without an unlocked session.
    #[error("vault is locked")]
    Locked,

    /// Unlock or rotation attempted before first-time setup.
    #[error("vault not initialized")]
    NotInitialized,

    /// Initialize attempted on a vault that already has a passphrase.
    #[error("vault already initialized")]
    AlreadyInitialized,

    /// A reserved metadata blob is present but malformed.
    #[error("vault metadata corrupted: {0}")]
    CorruptMetadata(&'static str),

    /// Blob store failure, passed through unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Key derivation or cipher failure.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// JSON (de)serialization failure outside the decrypt path.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Legacy store I/O failure during migration.
    #[error("legacy store error: {0}")]
    Legacy(#[from] std::io::Error),
}
