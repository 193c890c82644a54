//! Legacy migration tests.
//!
//! Covers detection of the pre-vault `socialOrbit_*` format, value
//! parsing, the write-through-before-purge ordering under storage
//! failures, and the file-backed legacy store.

use async_trait::async_trait;
use orbit_crypto::KdfParams;
use orbit_storage::{BlobStore, MemoryBlobStore, StorageError, StorageResult};
use orbit_vault::legacy::{
    detect_legacy_data, migrate_legacy, FileLegacyStore, LegacyStore, MemoryLegacyStore,
};
use orbit_vault::{Vault, VaultConfig, VaultError};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
        unlock_backoff: Duration::ZERO,
    }
}

fn fresh_vault() -> Vault {
    Vault::with_config(Arc::new(MemoryBlobStore::new()), fast_config())
}

fn full_legacy_store() -> MemoryLegacyStore {
    MemoryLegacyStore::from_pairs([
        ("socialOrbit_friends", r#"[{"id":2}]"#),
        ("socialOrbit_persona", r#"{"name":"Sam","tone":"warm"}"#),
        ("socialOrbit_formData", r#"{"goal":"reconnect"}"#),
        ("socialOrbit_mockMode", "true"),
        ("socialOrbit_apiKey", "sk-legacy-123"),
    ])
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration into the vault
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn migrates_full_legacy_set() {
    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    let mut legacy = full_legacy_store();

    let report = migrate_legacy(&vault, &mut legacy).await.unwrap();

    assert_eq!(
        report.migrated_keys,
        vec![
            "formData".to_string(),
            "friends".to_string(),
            "mockMode".to_string(),
            "persona".to_string()
        ]
    );
    assert!(report.credential_installed);

    assert_eq!(
        vault.get_item("friends").await.unwrap(),
        Some(json!([{"id": 2}]))
    );
    assert_eq!(
        vault.get_item("persona").await.unwrap(),
        Some(json!({"name": "Sam", "tone": "warm"}))
    );
    assert_eq!(
        vault.get_item("formData").await.unwrap(),
        Some(json!({"goal": "reconnect"}))
    );
    assert_eq!(vault.get_item("mockMode").await.unwrap(), Some(json!(true)));
    assert_eq!(
        vault.api_credential().await.unwrap(),
        Some("sk-legacy-123".to_string())
    );

    // Everything known is purged; nothing is left to migrate.
    assert!(legacy.is_empty());
    assert!(!detect_legacy_data(&legacy));
}

#[tokio::test]
async fn migrated_values_survive_relock() {
    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    let mut legacy = full_legacy_store();
    migrate_legacy(&vault, &mut legacy).await.unwrap();

    vault.lock().await;
    vault.unlock("orbit4").await.unwrap();

    assert_eq!(
        vault.get_item("friends").await.unwrap(),
        Some(json!([{"id": 2}]))
    );
    // The credential was memory-only and did not survive the lock.
    assert_eq!(vault.api_credential().await.unwrap(), None);
}

#[tokio::test]
async fn non_json_legacy_value_migrates_as_string() {
    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    let mut legacy =
        MemoryLegacyStore::from_pairs([("socialOrbit_persona", "free-form persona notes")]);

    migrate_legacy(&vault, &mut legacy).await.unwrap();
    assert_eq!(
        vault.get_item("persona").await.unwrap(),
        Some(json!("free-form persona notes"))
    );
}

#[tokio::test]
async fn migration_requires_unlocked_vault() {
    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    vault.lock().await;

    let mut legacy = full_legacy_store();
    assert!(matches!(
        migrate_legacy(&vault, &mut legacy).await,
        Err(VaultError::Locked)
    ));

    // The legacy data is untouched and detection still fires.
    assert!(legacy.contains("socialOrbit_friends"));
    assert!(legacy.contains("socialOrbit_apiKey"));
    assert!(detect_legacy_data(&legacy));
}

#[tokio::test]
async fn empty_legacy_store_migrates_to_empty_report() {
    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    let mut legacy = MemoryLegacyStore::new();

    let report = migrate_legacy(&vault, &mut legacy).await.unwrap();
    assert!(report.migrated_keys.is_empty());
    assert!(!report.credential_installed);
}

// ─────────────────────────────────────────────────────────────────────────────
// Purge ordering under write failure
// ─────────────────────────────────────────────────────────────────────────────

/// Blob store that can be armed to reject item writes, standing in for a
/// full disk or revoked storage quota mid-migration.
struct FlakyBlobStore {
    inner: MemoryBlobStore,
    fail_item_writes: AtomicBool,
}

impl FlakyBlobStore {
    fn new() -> Self {
        Self {
            inner: MemoryBlobStore::new(),
            fail_item_writes: AtomicBool::new(false),
        }
    }

    fn arm(&self) {
        self.fail_item_writes.store(true, Ordering::Relaxed);
    }

    fn disarm(&self) {
        self.fail_item_writes.store(false, Ordering::Relaxed);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        if self.fail_item_writes.load(Ordering::Relaxed) && key.starts_with("item:") {
            return Err(StorageError::Unavailable("injected write failure".into()));
        }
        self.inner.set(key, value).await
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        self.inner.set_many(entries).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.inner.clear().await
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.inner.list_keys().await
    }
}

#[tokio::test]
async fn failed_write_through_leaves_legacy_data_intact() {
    let store = Arc::new(FlakyBlobStore::new());
    let vault = Vault::with_config(store.clone(), fast_config());
    vault.initialize("orbit4").await.unwrap();

    let mut legacy = full_legacy_store();
    store.arm();
    assert!(matches!(
        migrate_legacy(&vault, &mut legacy).await,
        Err(VaultError::Storage(_))
    ));

    // Nothing was purged: every legacy key is still there for a retry.
    for key in [
        "socialOrbit_friends",
        "socialOrbit_persona",
        "socialOrbit_formData",
        "socialOrbit_mockMode",
        "socialOrbit_apiKey",
    ] {
        assert!(legacy.contains(key), "{key} was purged before write-through");
    }

    // Once the store recovers, the same migration goes through.
    store.disarm();
    let report = migrate_legacy(&vault, &mut legacy).await.unwrap();
    assert_eq!(report.migrated_keys.len(), 4);
    assert!(legacy.is_empty());
    assert_eq!(
        vault.get_item("friends").await.unwrap(),
        Some(json!([{"id": 2}]))
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// File-backed legacy store
// ─────────────────────────────────────────────────────────────────────────────

fn write_legacy_file(path: &std::path::Path, entries: &[(&str, &str)]) {
    let map: std::collections::BTreeMap<&str, &str> = entries.iter().copied().collect();
    std::fs::write(path, serde_json::to_vec_pretty(&map).unwrap()).unwrap();
}

#[test]
fn file_store_loads_and_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    write_legacy_file(
        &path,
        &[
            ("socialOrbit_friends", "[]"),
            ("socialOrbit_mockMode", "false"),
        ],
    );

    let mut store = FileLegacyStore::open(&path).unwrap();
    assert_eq!(store.get("socialOrbit_friends").as_deref(), Some("[]"));
    assert!(store.contains("socialOrbit_mockMode"));

    store.remove_keys(&["socialOrbit_friends"]).unwrap();
    let reloaded = FileLegacyStore::open(&path).unwrap();
    assert!(!reloaded.contains("socialOrbit_friends"));
    assert!(reloaded.contains("socialOrbit_mockMode"));
}

#[test]
fn file_store_missing_file_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLegacyStore::open(dir.path().join("absent.json")).unwrap();
    assert!(store.is_empty());
    assert!(!detect_legacy_data(&store));
}

#[test]
fn file_store_deletes_file_when_emptied() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    write_legacy_file(&path, &[("socialOrbit_mockMode", "true")]);

    let mut store = FileLegacyStore::open(&path).unwrap();
    store.remove_keys(&["socialOrbit_mockMode"]).unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn migration_from_file_store_removes_known_keys_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.json");
    write_legacy_file(
        &path,
        &[
            ("socialOrbit_friends", r#"[{"id":2}]"#),
            ("someOtherApp_setting", "keep-me"),
        ],
    );

    let vault = fresh_vault();
    vault.initialize("orbit4").await.unwrap();
    let mut legacy = FileLegacyStore::open(&path).unwrap();
    migrate_legacy(&vault, &mut legacy).await.unwrap();

    assert_eq!(
        vault.get_item("friends").await.unwrap(),
        Some(json!([{"id": 2}]))
    );

    // The file survives with the foreign key intact.
    let reloaded = FileLegacyStore::open(&path).unwrap();
    assert!(!reloaded.contains("socialOrbit_friends"));
    assert_eq!(reloaded.get("someOtherApp_setting").as_deref(), Some("keep-me"));
}
