//! In-memory blob store for tests and ephemeral sessions.

use async_trait::async_trait;
use crate::error::{StorageError, StorageResult};
use crate::store::BlobStore;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Non-durable [`BlobStore`] backed by an ordered map.
///
/// Everything vanishes on drop. Used in tests and by callers that want
/// vault semantics for a single session without touching disk.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_map(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .read()
            .map_err(|e| StorageError::Unavailable(format!("blob map lock poisoned: {e}")))
    }

    fn write_map(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.blobs
            .write()
            .map_err(|e| StorageError::Unavailable(format!("blob map lock poisoned: {e}")))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.write_map()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        // One guard held across the whole batch keeps it atomic.
        let mut map = self.write_map()?;
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.write_map()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.write_map()?.clear();
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.read_map()?.keys().cloned().collect())
    }
}
