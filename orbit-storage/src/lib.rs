//! Persistent blob storage for the Orbit vault.
//!
//! This crate defines the asynchronous [`BlobStore`] contract the vault
//! persists through, plus two implementations:
//!
//! - [`DuckDbBlobStore`] — durable storage in a single-table embedded
//!   DuckDB database, with stale-WAL recovery on open
//! - [`MemoryBlobStore`] — an ordered in-memory map for tests and
//!   ephemeral sessions
//!
//! Blobs are opaque bytes. The vault layer stores serialized encrypted
//! records and a few non-sensitive metadata keys here; nothing in this
//! crate can decrypt or interpret them.

mod duckdb_store;
mod error;
mod memory_store;
mod store;

pub use duckdb_store::DuckDbBlobStore;
pub use error::{StorageError, StorageResult};
pub use memory_store::MemoryBlobStore;
pub use store::BlobStore;
