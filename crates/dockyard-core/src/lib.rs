//! Version synchronization and snapshot engine for the Dockyard catalog.
//!
//! This crate ties source control, registries and the durable store together
//! into the `Engine`: it resolves descriptor imports, parses descriptors,
//! resolves every referenced container image to its digests, commits the
//! result as a `Version` through a poisoning `TransactionHelper`, serves the
//! cached dependency graph and tool table, and freezes versions into
//! immutable snapshots. It also provides per-version locking, cancellation,
//! and the TOML configuration file.

pub mod concurrency;
pub mod config;
pub mod derived;
pub mod engine;
pub mod freeze;
pub mod images;
pub mod imports;
pub mod lifecycle;
pub mod parse;
pub mod transaction;

pub use concurrency::{install_signal_handler, CancelToken, StoreLock, VersionLock};
pub use config::{DockyardConfig, SyncConfig, CONFIG_ENV};
pub use engine::{Engine, RefreshFailure, RefreshReport, RegisterRequest, SyncReport};
pub use freeze::{check_freezable, FreezeError};
pub use images::{ImageResolver, ImageResolution};
pub use imports::{FileSet, ImportResolver, ResolvedFile};
pub use lifecycle::validate_transition;
pub use parse::{parser_for, DescriptorParser, ImportRef, ParseOutcome, Step};
pub use transaction::{HelperState, TransactionHelper};

use dockyard_store::StoreError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] dockyard_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] dockyard_remote::RemoteError),
    #[error("primary descriptor '{path}' missing at '{reference}'")]
    PrimaryDescriptorMissing { path: String, reference: String },
    #[error("unsupported descriptor language: {0}")]
    UnsupportedLanguage(String),
    #[error("{0}")]
    Freeze(#[from] FreezeError),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("transaction helper poisoned: {0}")]
    Poisoned(Arc<StoreError>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("entry not found: {0}")]
    EntryNotFound(String),
    #[error("version not found: {0}")]
    VersionNotFound(String),
    #[error("gave up on version {version_id} after {attempts} conflicting writes")]
    Contention { version_id: String, attempts: u32 },
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// A lost optimistic-concurrency race, worth retrying on fresh state.
    pub fn is_revision_conflict(&self) -> bool {
        let store = match self {
            CoreError::Store(e) => e,
            CoreError::Poisoned(e) => e.as_ref(),
            _ => return false,
        };
        matches!(store, StoreError::RevisionConflict { .. })
    }
}
