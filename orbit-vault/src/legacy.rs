//! One-time migration from the legacy flat key-value store.
//!
//! Before the vault existed, the app kept its data as plaintext strings in
//! a flat key-value store under `socialOrbit_*` keys. This module detects
//! that format, reads it into typed values, writes everything through an
//! unlocked [`Vault`], and only then purges the legacy keys.
//!
//! The ordering is the whole point: legacy data is never removed until
//! every value has been confirmed written into the vault, so a failed or
//! interrupted migration can always be retried.

use crate::error::{VaultError, VaultResult};
use crate::vault::Vault;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

/// Legacy store key → vault logical key.
const LEGACY_KEY_MAP: &[(&str, &str)] = &[
    ("socialOrbit_friends", "friends"),
    ("socialOrbit_persona", "persona"),
    ("socialOrbit_formData", "formData"),
    ("socialOrbit_mockMode", "mockMode"),
];

/// The legacy API key entry. Migrated into the in-memory credential slot
/// only; it must never reach the blob store.
const LEGACY_API_KEY: &str = "socialOrbit_apiKey";

// ============================================================================
// Legacy store contract
// ============================================================================

/// The flat string→string store the pre-vault app wrote to.
///
/// Reads are infallible (the store is loaded up front); only the purge can
/// fail, because it rewrites the backing file.
pub trait LegacyStore {
    /// Raw value under a legacy key, if present.
    fn get(&self, key: &str) -> Option<String>;

    /// Whether a legacy key is present.
    fn contains(&self, key: &str) -> bool;

    /// Removes the given keys and persists the removal.
    fn remove_keys(&mut self, keys: &[&str]) -> io::Result<()>;
}

/// Legacy store backed by a flat JSON object file (string values only).
///
/// A missing file is an empty store. Removing the last entry deletes the
/// file outright.
pub struct FileLegacyStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileLegacyStore {
    /// Loads the legacy file into memory.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LegacyStore for FileLegacyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn remove_keys(&mut self, keys: &[&str]) -> io::Result<()> {
        for key in keys {
            self.entries.remove(*key);
        }
        if self.entries.is_empty() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        } else {
            let bytes = serde_json::to_vec_pretty(&self.entries)?;
            std::fs::write(&self.path, bytes)?;
        }
        Ok(())
    }
}

/// In-memory legacy store for tests.
#[derive(Debug, Default)]
pub struct MemoryLegacyStore {
    entries: BTreeMap<String, String>,
}

impl MemoryLegacyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LegacyStore for MemoryLegacyStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn remove_keys(&mut self, keys: &[&str]) -> io::Result<()> {
        for key in keys {
            self.entries.remove(*key);
        }
        Ok(())
    }
}

// ============================================================================
// Detection and reading
// ============================================================================

/// Typed view of whatever legacy data is present.
#[derive(Debug, Default)]
pub struct LegacySnapshot {
    /// Logical key → parsed value.
    pub values: BTreeMap<String, Value>,
    /// The legacy API key, if one was stored.
    pub api_credential: Option<String>,
}

/// Result of a completed migration.
#[derive(Debug)]
pub struct MigrationReport {
    /// Logical keys written into the vault, sorted.
    pub migrated_keys: Vec<String>,
    /// Whether a legacy API key was installed as the session credential.
    pub credential_installed: bool,
}

/// Whether any known legacy key is present.
pub fn detect_legacy_data<L: LegacyStore>(store: &L) -> bool {
    LEGACY_KEY_MAP
        .iter()
        .any(|(legacy_key, _)| store.contains(legacy_key))
        || store.contains(LEGACY_API_KEY)
}

/// Reads every known legacy key into a typed snapshot.
///
/// Each value is parsed as JSON; a value that does not parse is kept as a
/// plain string rather than dropped, so nothing the user had is lost. The
/// API key is taken verbatim.
pub fn read_legacy_data<L: LegacyStore>(store: &L) -> LegacySnapshot {
    let mut snapshot = LegacySnapshot::default();
    for &(legacy_key, logical_key) in LEGACY_KEY_MAP {
        let Some(raw) = store.get(legacy_key) else {
            continue;
        };
        let value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => {
                debug!(key = logical_key, "legacy value is not JSON; keeping it as a string");
                Value::String(raw)
            }
        };
        snapshot.values.insert(logical_key.to_string(), value);
    }
    snapshot.api_credential = store.get(LEGACY_API_KEY);
    snapshot
}

// ============================================================================
// Migration
// ============================================================================

/// Migrates all legacy data into an unlocked vault, then purges it.
///
/// Every snapshot value is written through [`Vault::set_item`] and the API
/// key (if any) installed as the in-memory credential. The legacy keys are
/// removed only after every write has succeeded; any earlier failure
/// returns with the legacy store untouched so the migration can be
/// retried.
pub async fn migrate_legacy<L: LegacyStore>(
    vault: &Vault,
    store: &mut L,
) -> VaultResult<MigrationReport> {
    if !vault.is_unlocked().await {
        return Err(VaultError::Locked);
    }

    let snapshot = read_legacy_data(store);
    let mut migrated_keys = Vec::with_capacity(snapshot.values.len());
    for (key, value) in &snapshot.values {
        vault.set_item(key, value.clone()).await?;
        migrated_keys.push(key.clone());
    }

    let credential_installed = match &snapshot.api_credential {
        Some(credential) => {
            vault.set_api_credential(credential).await?;
            true
        }
        None => false,
    };

    // Write-through is confirmed; only now may the legacy keys go.
    let mut purge: Vec<&str> = LEGACY_KEY_MAP.iter().map(|(k, _)| *k).collect();
    purge.push(LEGACY_API_KEY);
    store.remove_keys(&purge)?;

    info!(
        migrated = migrated_keys.len(),
        credential = credential_installed,
        "legacy migration complete"
    );
    Ok(MigrationReport {
        migrated_keys,
        credential_installed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_legacy_store() -> MemoryLegacyStore {
        MemoryLegacyStore::from_pairs([
            ("socialOrbit_friends", r#"[{"id":2}]"#),
            ("socialOrbit_persona", r#"{"name":"Sam"}"#),
            ("socialOrbit_mockMode", "true"),
            ("socialOrbit_apiKey", "sk-legacy-123"),
        ])
    }

    #[test]
    fn detects_any_known_key() {
        assert!(detect_legacy_data(&full_legacy_store()));
        assert!(detect_legacy_data(&MemoryLegacyStore::from_pairs([(
            "socialOrbit_apiKey",
            "sk-x"
        )])));
        assert!(!detect_legacy_data(&MemoryLegacyStore::new()));
        // Unknown keys alone do not count.
        assert!(!detect_legacy_data(&MemoryLegacyStore::from_pairs([(
            "unrelated", "x"
        )])));
    }

    #[test]
    fn reads_and_parses_values() {
        let snapshot = read_legacy_data(&full_legacy_store());
        assert_eq!(
            snapshot.values.get("friends"),
            Some(&serde_json::json!([{"id": 2}]))
        );
        assert_eq!(
            snapshot.values.get("persona"),
            Some(&serde_json::json!({"name": "Sam"}))
        );
        assert_eq!(snapshot.values.get("mockMode"), Some(&Value::Bool(true)));
        assert_eq!(snapshot.values.get("formData"), None);
        assert_eq!(snapshot.api_credential.as_deref(), Some("sk-legacy-123"));
    }

    #[test]
    fn unparseable_value_survives_as_string() {
        let store =
            MemoryLegacyStore::from_pairs([("socialOrbit_persona", "just some prose, not JSON")]);
        let snapshot = read_legacy_data(&store);
        assert_eq!(
            snapshot.values.get("persona"),
            Some(&Value::String("just some prose, not JSON".to_string()))
        );
    }

    #[test]
    fn api_key_is_taken_verbatim() {
        // Even a value that happens to parse as JSON is not unwrapped.
        let store = MemoryLegacyStore::from_pairs([("socialOrbit_apiKey", r#""quoted""#)]);
        let snapshot = read_legacy_data(&store);
        assert_eq!(snapshot.api_credential.as_deref(), Some(r#""quoted""#));
    }
}
