//! Passphrase-protected vault over an injected blob store.
//!
//! The vault owns the lifecycle (initialize, unlock, lock, destroy), the
//! per-item encrypt/decrypt path, passphrase rotation, and plaintext
//! export/import. Key material exists only inside an unlocked session and
//! zeroizes when the session drops.

use chrono::Utc;
use crate::error::{VaultError, VaultResult};
use orbit_crypto::{
    decrypt, decrypt_json, derive_key, encrypt, encrypt_json, DerivedKey, EncryptedRecord,
    KdfParams, Salt, SALT_SIZE,
};
use orbit_storage::BlobStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Reserved store key holding the KDF salt (stored unencrypted).
const SALT_KEY: &str = "meta:salt";

/// Reserved store key holding the encrypted verification token.
const VERIFICATION_KEY: &str = "meta:verification";

/// Store-key prefix for encrypted logical items. Keeps application keys
/// disjoint from the reserved `meta:` keys in the shared blob table.
const ITEM_PREFIX: &str = "item:";

/// Minimum accepted passphrase length, in characters.
pub const MIN_PASSPHRASE_LEN: usize = 4;

/// Known marker inside the verification token. Decrypting the token and
/// finding this marker proves the derived key is the right one.
const VERIFICATION_MARKER: &str = "orbit-vault-verification-v1";

/// Unlock delays stop doubling after this many consecutive failures
/// (caps the schedule at 32x the base delay).
const BACKOFF_CAP_DOUBLINGS: u32 = 5;

// ============================================================================
// Public types
// ============================================================================

/// Lifecycle state of a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultState {
    /// No verification token in the store; `initialize` is the only way in.
    Uninitialized,
    /// Initialized, but no key material in memory.
    Locked,
    /// Key material lives in memory; data operations are available.
    Unlocked,
}

/// Outcome of a strict item read.
///
/// [`Vault::get_item`] collapses `Missing` and `Corrupted` to `None` for
/// callers that only care about usable data; callers that must distinguish
/// "never stored" from "stored but undecryptable" use
/// [`Vault::read_item`] directly.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemRead {
    /// The record decrypted successfully.
    Value(Value),
    /// No record exists under this key.
    Missing,
    /// A record exists but does not decrypt under the session key.
    Corrupted,
}

/// Tuning knobs for a vault instance.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Argon2id parameters for passphrase-derived keys.
    pub kdf: KdfParams,
    /// Base delay of the unlock backoff schedule. `Duration::ZERO` disables
    /// throttling entirely.
    pub unlock_backoff: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            unlock_backoff: Duration::from_millis(200),
        }
    }
}

/// Plaintext snapshot of every readable item, for backup or device transfer.
///
/// Everything in here is decrypted. The caller owns its lifetime and
/// disposal; the vault never writes an export anywhere.
#[derive(Debug, Serialize, Deserialize)]
pub struct VaultExport {
    /// Unix millis at export time.
    pub exported_at: i64,
    /// Logical key → decrypted value.
    pub values: BTreeMap<String, Value>,
    /// Logical keys whose records no longer decrypt and were left out.
    pub skipped: Vec<String>,
}

/// Verification token plaintext: a known marker encrypted under the derived
/// key at initialization. Successful decrypt + marker match on unlock
/// proves the passphrase without storing anything derived from it.
#[derive(Debug, Serialize, Deserialize)]
struct VerificationToken {
    marker: String,
    created_at: i64,
}

impl VerificationToken {
    fn new() -> Self {
        Self {
            marker: VERIFICATION_MARKER.to_string(),
            created_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Everything that exists only while the vault is unlocked. Dropping the
/// session (on lock or destroy) is what "forgetting the key" means: the
/// derived key zeroizes itself, the plaintext cache and credential go
/// with it.
struct Session {
    key: DerivedKey,
    /// Plaintext read cache over decrypted items.
    cache: HashMap<String, Value>,
    /// In-memory API credential. Never persisted; expiry is the caller's
    /// job.
    credential: Option<Zeroizing<String>>,
}

impl Session {
    fn new(key: DerivedKey) -> Self {
        Self {
            key,
            cache: HashMap::new(),
            credential: None,
        }
    }
}

// ============================================================================
// Vault
// ============================================================================

/// Passphrase-protected vault over an injected [`BlobStore`].
///
/// All mutating operations serialize on one internal lock, so a `set_item`
/// can never interleave with a passphrase rotation on the same instance.
/// The vault holds no global state; create as many instances over as many
/// stores as needed.
pub struct Vault {
    store: Arc<dyn BlobStore>,
    config: VaultConfig,
    session: RwLock<Option<Session>>,
    failed_unlocks: AtomicU32,
}

impl Vault {
    /// Creates a vault over the given store with default configuration.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self::with_config(store, VaultConfig::default())
    }

    /// Creates a vault with explicit KDF and backoff configuration.
    pub fn with_config(store: Arc<dyn BlobStore>, config: VaultConfig) -> Self {
        Self {
            store,
            config,
            session: RwLock::new(None),
            failed_unlocks: AtomicU32::new(0),
        }
    }

    /// Whether the store already holds an initialized vault.
    pub async fn exists(&self) -> VaultResult<bool> {
        Ok(self.store.get(VERIFICATION_KEY).await?.is_some())
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> VaultResult<VaultState> {
        if self.session.read().await.is_some() {
            return Ok(VaultState::Unlocked);
        }
        if self.exists().await? {
            Ok(VaultState::Locked)
        } else {
            Ok(VaultState::Uninitialized)
        }
    }

    /// Whether a session key is currently in memory.
    pub async fn is_unlocked(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Consecutive failed unlock attempts since the last successful
    /// passphrase verification.
    pub fn failed_unlock_attempts(&self) -> u32 {
        self.failed_unlocks.load(Ordering::Relaxed)
    }

    /// First-time setup: derives a key from the passphrase, writes the salt
    /// and verification token, and leaves the vault unlocked.
    pub async fn initialize(&self, passphrase: &str) -> VaultResult<()> {
        require_strong(passphrase)?;
        let mut session = self.session.write().await;

        if self.verification_record().await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }

        // A salt without a token means an earlier initialize died between
        // writes; reuse it rather than orphaning it.
        let salt = match self.stored_salt().await? {
            Some(salt) => salt,
            None => Salt::random(),
        };
        let key = derive_key(passphrase, &salt, &self.config.kdf)?;

        let token_bytes = serde_json::to_vec(&VerificationToken::new())?;
        let verification = encrypt(&key, &token_bytes)?;

        let batch = vec![
            (SALT_KEY.to_string(), salt.as_bytes().to_vec()),
            (VERIFICATION_KEY.to_string(), serde_json::to_vec(&verification)?),
        ];
        self.store.set_many(&batch).await?;

        *session = Some(Session::new(key));
        info!("vault initialized");
        Ok(())
    }

    /// Unlocks with the passphrase, verifying it against the stored token.
    ///
    /// A wrong passphrase leaves the vault locked, retains no key material,
    /// and bumps the failure counter that drives the retry backoff. If the
    /// vault was already unlocked, a successful re-verification keeps the
    /// existing cache and credential.
    pub async fn unlock(&self, passphrase: &str) -> VaultResult<()> {
        let mut session = self.session.write().await;

        let salt = self.stored_salt().await?.ok_or(VaultError::NotInitialized)?;
        let verification = self
            .verification_record()
            .await?
            .ok_or(VaultError::NotInitialized)?;

        let failures = self.failed_unlocks.load(Ordering::Relaxed);
        let delay = unlock_delay(self.config.unlock_backoff, failures);
        if !delay.is_zero() {
            debug!(failures, ?delay, "delaying unlock attempt");
            tokio::time::sleep(delay).await;
        }

        let key = derive_key(passphrase, &salt, &self.config.kdf)?;
        if !verification_matches(&key, &verification) {
            let failures = self.failed_unlocks.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(failures, "unlock rejected: passphrase verification failed");
            return Err(VaultError::IncorrectPassphrase);
        }

        self.failed_unlocks.store(0, Ordering::Relaxed);
        *session = Some(match session.take() {
            Some(existing) => Session {
                key,
                cache: existing.cache,
                credential: existing.credential,
            },
            None => Session::new(key),
        });
        info!("vault unlocked");
        Ok(())
    }

    /// Drops the session: key material zeroizes, the plaintext cache and
    /// API credential are discarded. Encrypted data stays in the store.
    pub async fn lock(&self) {
        let mut session = self.session.write().await;
        if session.take().is_some() {
            debug!("vault locked");
        }
    }

    /// Wipes the vault entirely: every blob (salt, token, items) is removed
    /// and the session dropped. The vault returns to `Uninitialized`; any
    /// "are you sure" confirmation flow belongs to the hosting layer.
    pub async fn destroy(&self) -> VaultResult<()> {
        let mut session = self.session.write().await;
        self.store.clear().await?;
        *session = None;
        self.failed_unlocks.store(0, Ordering::Relaxed);
        info!("vault destroyed");
        Ok(())
    }

    /// Encrypts and stores a value under a logical key, then updates the
    /// session cache.
    pub async fn set_item(&self, key: &str, value: Value) -> VaultResult<()> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;

        let record = encrypt_json(&active.key, &value)?;
        let bytes = serde_json::to_vec(&record)?;
        self.store.set(&item_store_key(key), &bytes).await?;

        active.cache.insert(key.to_string(), value);
        Ok(())
    }

    /// Strict read: distinguishes a decrypted value from a key that was
    /// never set and from a record that no longer decrypts.
    pub async fn read_item(&self, key: &str) -> VaultResult<ItemRead> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;

        if let Some(value) = active.cache.get(key) {
            return Ok(ItemRead::Value(value.clone()));
        }

        let Some(bytes) = self.store.get(&item_store_key(key)).await? else {
            return Ok(ItemRead::Missing);
        };
        let Ok(record) = serde_json::from_slice::<EncryptedRecord>(&bytes) else {
            warn!(key, "stored record is not a valid encrypted envelope");
            return Ok(ItemRead::Corrupted);
        };
        match decrypt_json(&active.key, &record) {
            Ok(value) => {
                active.cache.insert(key.to_string(), value.clone());
                Ok(ItemRead::Value(value))
            }
            Err(_) => {
                warn!(key, "record failed to decrypt under the session key");
                Ok(ItemRead::Corrupted)
            }
        }
    }

    /// Permissive read: `None` for both missing and corrupted records
    /// (corruption is logged). The convenience surface most callers want.
    pub async fn get_item(&self, key: &str) -> VaultResult<Option<Value>> {
        match self.read_item(key).await? {
            ItemRead::Value(value) => Ok(Some(value)),
            ItemRead::Missing | ItemRead::Corrupted => Ok(None),
        }
    }

    /// Deletes a logical key from the store and the cache. Removing a key
    /// that was never set is not an error.
    pub async fn remove_item(&self, key: &str) -> VaultResult<()> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;

        self.store.delete(&item_store_key(key)).await?;
        active.cache.remove(key);
        Ok(())
    }

    /// Sorted logical keys currently stored.
    pub async fn item_keys(&self) -> VaultResult<Vec<String>> {
        let session = self.session.read().await;
        if session.is_none() {
            return Err(VaultError::Locked);
        }
        self.list_item_keys().await
    }

    /// Changes the passphrase, re-encrypting every item under a fresh salt
    /// and key.
    ///
    /// The swap is staged: all items are decrypted into memory, re-encrypted
    /// under the new key, and committed together with the new salt and
    /// verification token in a single atomic batch. Any failure before the
    /// commit leaves the vault fully on the old passphrase. Records that no
    /// longer decrypt under the old key cannot survive rotation; they are
    /// dropped from the batch and their blobs deleted after the commit.
    ///
    /// Works from the locked state as well (the current passphrase is
    /// verified either way) and always ends unlocked under the new key.
    pub async fn change_passphrase(&self, current: &str, new: &str) -> VaultResult<()> {
        require_strong(new)?;
        let mut session = self.session.write().await;

        let salt = self.stored_salt().await?.ok_or(VaultError::NotInitialized)?;
        let verification = self
            .verification_record()
            .await?
            .ok_or(VaultError::NotInitialized)?;
        let old_key = derive_key(current, &salt, &self.config.kdf)?;
        if !verification_matches(&old_key, &verification) {
            return Err(VaultError::IncorrectPassphrase);
        }

        // Stage 1: everything readable comes into memory under the old key.
        let mut plaintexts: Vec<(String, Value)> = Vec::new();
        let mut dropped: Vec<String> = Vec::new();
        for key in self.list_item_keys().await? {
            let Some(bytes) = self.store.get(&item_store_key(&key)).await? else {
                continue;
            };
            let value = serde_json::from_slice::<EncryptedRecord>(&bytes)
                .ok()
                .and_then(|record| decrypt_json(&old_key, &record).ok());
            match value {
                Some(value) => plaintexts.push((key, value)),
                None => {
                    warn!(key = %key, "record does not decrypt under the current key; dropping it from rotation");
                    dropped.push(key);
                }
            }
        }

        // Stage 2: fresh salt, key, and token; re-encrypt into one batch.
        let new_salt = Salt::random();
        let new_key = derive_key(new, &new_salt, &self.config.kdf)?;
        let token_bytes = serde_json::to_vec(&VerificationToken::new())?;
        let new_verification = encrypt(&new_key, &token_bytes)?;

        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(plaintexts.len() + 2);
        batch.push((SALT_KEY.to_string(), new_salt.as_bytes().to_vec()));
        batch.push((
            VERIFICATION_KEY.to_string(),
            serde_json::to_vec(&new_verification)?,
        ));
        for (key, value) in &plaintexts {
            let record = encrypt_json(&new_key, value)?;
            batch.push((item_store_key(key), serde_json::to_vec(&record)?));
        }

        // Stage 3: the commit point. Nothing was written before this line.
        self.store.set_many(&batch).await?;

        // Already-unreadable blobs are now orphans under a retired key.
        for key in &dropped {
            self.store.delete(&item_store_key(key)).await?;
        }

        let item_count = plaintexts.len();
        let credential = session.take().and_then(|s| s.credential);
        *session = Some(Session {
            key: new_key,
            cache: plaintexts.into_iter().collect(),
            credential,
        });
        self.failed_unlocks.store(0, Ordering::Relaxed);
        info!(items = item_count, dropped = dropped.len(), "passphrase rotated");
        Ok(())
    }

    /// Decrypts every stored item into a plaintext snapshot. Records that
    /// no longer decrypt are listed in [`VaultExport::skipped`] rather than
    /// failing the whole export.
    pub async fn export_data(&self) -> VaultResult<VaultExport> {
        let session = self.session.read().await;
        let active = session.as_ref().ok_or(VaultError::Locked)?;

        let mut values = BTreeMap::new();
        let mut skipped = Vec::new();
        for key in self.list_item_keys().await? {
            if let Some(value) = active.cache.get(&key) {
                values.insert(key, value.clone());
                continue;
            }
            let Some(bytes) = self.store.get(&item_store_key(&key)).await? else {
                continue;
            };
            let value = serde_json::from_slice::<EncryptedRecord>(&bytes)
                .ok()
                .and_then(|record| decrypt_json(&active.key, &record).ok());
            match value {
                Some(value) => {
                    values.insert(key, value);
                }
                None => {
                    warn!(key = %key, "record does not decrypt; leaving it out of the export");
                    skipped.push(key);
                }
            }
        }

        Ok(VaultExport {
            exported_at: Utc::now().timestamp_millis(),
            values,
            skipped,
        })
    }

    /// Re-encrypts an export under the session key and commits all of it in
    /// one atomic batch. Existing keys are overwritten; keys absent from
    /// the export are left alone. Returns the number of items written.
    pub async fn import_data(&self, export: &VaultExport) -> VaultResult<usize> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;

        let mut batch: Vec<(String, Vec<u8>)> = Vec::with_capacity(export.values.len());
        for (key, value) in &export.values {
            let record = encrypt_json(&active.key, value)?;
            batch.push((item_store_key(key), serde_json::to_vec(&record)?));
        }
        self.store.set_many(&batch).await?;

        for (key, value) in &export.values {
            active.cache.insert(key.clone(), value.clone());
        }
        info!(items = batch.len(), "imported vault export");
        Ok(batch.len())
    }

    /// Holds a credential in the unlocked session. It is never written to
    /// the store and vanishes on lock; the hosting layer owns its expiry.
    pub async fn set_api_credential(&self, credential: &str) -> VaultResult<()> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;
        active.credential = Some(Zeroizing::new(credential.to_string()));
        Ok(())
    }

    /// The current in-memory credential, if one is set.
    pub async fn api_credential(&self) -> VaultResult<Option<String>> {
        let session = self.session.read().await;
        let active = session.as_ref().ok_or(VaultError::Locked)?;
        Ok(active.credential.as_deref().cloned())
    }

    /// Drops the in-memory credential without locking.
    pub async fn clear_api_credential(&self) -> VaultResult<()> {
        let mut session = self.session.write().await;
        let active = session.as_mut().ok_or(VaultError::Locked)?;
        active.credential = None;
        Ok(())
    }

    async fn stored_salt(&self) -> VaultResult<Option<Salt>> {
        let Some(bytes) = self.store.get(SALT_KEY).await? else {
            return Ok(None);
        };
        let arr: [u8; SALT_SIZE] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::CorruptMetadata("stored salt has unexpected length"))?;
        Ok(Some(Salt::from_bytes(arr)))
    }

    async fn verification_record(&self) -> VaultResult<Option<EncryptedRecord>> {
        let Some(bytes) = self.store.get(VERIFICATION_KEY).await? else {
            return Ok(None);
        };
        let record = serde_json::from_slice(&bytes).map_err(|_| {
            VaultError::CorruptMetadata("verification token envelope is not valid JSON")
        })?;
        Ok(Some(record))
    }

    async fn list_item_keys(&self) -> VaultResult<Vec<String>> {
        let keys = self.store.list_keys().await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(ITEM_PREFIX).map(str::to_string))
            .collect())
    }
}

fn item_store_key(key: &str) -> String {
    format!("{ITEM_PREFIX}{key}")
}

fn require_strong(passphrase: &str) -> VaultResult<()> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(VaultError::WeakPassphrase);
    }
    Ok(())
}

fn verification_matches(key: &DerivedKey, record: &EncryptedRecord) -> bool {
    let Ok(bytes) = decrypt(key, record) else {
        return false;
    };
    match serde_json::from_slice::<VerificationToken>(&bytes) {
        Ok(token) => token.marker == VERIFICATION_MARKER,
        Err(_) => false,
    }
}

/// Delay before the next unlock attempt: `base * 2^(failures - 1)`, capped
/// at 32x base. Zero failures or a zero base means no delay.
fn unlock_delay(base: Duration, failures: u32) -> Duration {
    if failures == 0 || base.is_zero() {
        return Duration::ZERO;
    }
    let doublings = (failures - 1).min(BACKOFF_CAP_DOUBLINGS);
    base.saturating_mul(1u32 << doublings)
}
