//! The asynchronous key→blob contract implemented by every storage backend.

use async_trait::async_trait;
use crate::error::StorageResult;

/// Durable, asynchronous key→blob table.
///
/// Implementations hold opaque byte blobs addressed by logical-key strings.
/// Blob contents are never inspected here; the vault layer above stores
/// serialized encrypted records plus a few non-sensitive metadata keys, and
/// nothing in this crate can read them.
///
/// Single-key operations are atomic. [`set_many`](BlobStore::set_many)
/// applies its whole batch atomically so callers can swap multi-key state
/// (passphrase rotation, bulk import) without a mixed intermediate state
/// ever becoming visible.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads a blob, or `None` if the key has never been set.
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes a blob, overwriting any previous value.
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Writes a batch of blobs; either all entries land or none do.
    async fn set_many(&self, entries: &[(String, Vec<u8>)]) -> StorageResult<()>;

    /// Deletes a key. Deleting a missing key succeeds silently.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Removes every key in the store.
    async fn clear(&self) -> StorageResult<()>;

    /// Lists all keys in ascending lexicographic order.
    async fn list_keys(&self) -> StorageResult<Vec<String>>;
}
