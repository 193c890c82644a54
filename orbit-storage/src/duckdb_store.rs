//! DuckDB-backed blob store.
//!
//! A single `vault_blobs` table maps logical keys to opaque byte blobs with
//! creation and modification timestamps. The table never sees plaintext; the
//! layer above hands it serialized encrypted records.

use async_trait::async_trait;
use chrono::Utc;
use crate::error::{StorageError, StorageResult};
use crate::store::BlobStore;
use duckdb::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Memory ceiling for the embedded database. Blob workloads are tiny; this
/// keeps DuckDB from reserving a large default allocation.
const MEMORY_LIMIT: &str = "64MB";

/// Single-threaded is plenty for a key→blob table.
const THREADS: u32 = 1;

const UPSERT_BLOB_SQL: &str = "INSERT OR REPLACE INTO vault_blobs (key, value, created_at, modified_at)
     VALUES (?, ?, COALESCE((SELECT created_at FROM vault_blobs WHERE key = ?), ?), ?)";

/// Durable [`BlobStore`] backed by a single-table DuckDB database file.
///
/// The connection sits behind a mutex; DuckDB calls are short and
/// synchronous, so the async methods run them inline rather than handing
/// them to a blocking pool.
pub struct DuckDbBlobStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbBlobStore {
    /// Opens (or creates) a blob store at the given database path.
    pub fn open(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = open_with_wal_recovery(db_path.as_ref())?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_tables()?;
        debug!(path = %db_path.as_ref().display(), "opened blob store");
        Ok(store)
    }

    /// Opens a non-durable in-memory store. Used in tests and by callers
    /// that want vault semantics without a file on disk.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        configure_connection(&conn)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StorageResult<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vault_blobs (
                key VARCHAR PRIMARY KEY,
                value BLOB NOT NULL,
                created_at BIGINT NOT NULL,
                modified_at BIGINT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn lock_conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Unavailable(format!("connection lock poisoned: {e}")))
    }
}

#[async_trait]
impl BlobStore for DuckDbBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        match conn.query_row(
            "SELECT value FROM vault_blobs WHERE key = ?",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let now = Utc::now().timestamp_millis();
        let conn = self.lock_conn()?;
        conn.execute(UPSERT_BLOB_SQL, params![key, value, key, now, now])?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, Vec<u8>)]) -> StorageResult<()> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(UPSERT_BLOB_SQL, params![key, value, key, now, now])?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM vault_blobs WHERE key = ?", params![key])?;
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM vault_blobs", [])?;
        Ok(())
    }

    async fn list_keys(&self) -> StorageResult<Vec<String>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT key FROM vault_blobs ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }
}

fn configure_connection(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{MEMORY_LIMIT}'; PRAGMA threads={THREADS};"
    ))?;
    Ok(())
}

fn try_open(db_path: &Path) -> StorageResult<Connection> {
    let conn = Connection::open(db_path)?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Opens the database, recovering from a stale write-ahead log left behind
/// by an unclean shutdown. DuckDB refuses to open when the WAL references
/// a catalog state it cannot replay; removing the WAL and retrying loses at
/// most the final uncommitted batch.
fn open_with_wal_recovery(db_path: &Path) -> StorageResult<Connection> {
    match try_open(db_path) {
        Ok(conn) => Ok(conn),
        Err(first_err) => {
            let wal_path = PathBuf::from(format!("{}.wal", db_path.display()));
            if !wal_path.exists() {
                return Err(first_err);
            }
            warn!(
                wal = %wal_path.display(),
                error = %first_err,
                "open failed with stale WAL present; removing WAL and retrying"
            );
            std::fs::remove_file(&wal_path)
                .map_err(|e| StorageError::Unavailable(format!("cannot remove stale WAL: {e}")))?;
            try_open(db_path)
        }
    }
}
