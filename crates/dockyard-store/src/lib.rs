//! Durable storage for the Dockyard catalog.
//!
//! This crate provides the storage layer: a checksum-addressed `ObjectStore`
//! for descriptor contents, `CatalogStore` for entry and version records with
//! embedded blake3 record checksums, a `WriteAheadLog` that makes multi-record
//! commits all-or-nothing, `FileSession` implementing the unit-of-work
//! `Session` contract, `StoreLayout` for directory structure management, and
//! `verify_store_integrity`.

pub mod catalog;
pub mod integrity;
pub mod layout;
pub mod objects;
pub mod session;
pub mod wal;

pub use catalog::CatalogStore;
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use objects::ObjectStore;
pub use session::{FileSession, Session};
pub use wal::{RollbackStep, WalEntry, WriteAheadLog};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for '{hash}': expected {expected}, got {actual}")]
    IntegrityFailure {
        hash: String,
        expected: String,
        actual: String,
    },
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("version not found: {0}")]
    VersionNotFound(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("revision conflict on version {version_id}: expected {expected}, found {found}")]
    RevisionConflict {
        version_id: String,
        expected: u64,
        found: u64,
    },
    #[error("invalid transaction state: {0}")]
    TransactionState(String),
    #[error("session is closed")]
    SessionClosed,
}
