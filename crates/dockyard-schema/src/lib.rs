//! Catalog data model, content checksums, and identity hashing for Dockyard.
//!
//! This crate defines the schema layer: entries and their source locators
//! (`Entry`, `EntryKind`), synchronized versions with their source files and
//! image references (`Version`, `SourceFile`, `ImageReference`), image spec
//! parsing (`ImageSpec`), derived artifact shapes (`Graph`, `ToolTable`),
//! the SHA-256 content checksum, and deterministic entry/version identity.

pub mod artifact;
pub mod checksum;
pub mod entry;
pub mod identity;
pub mod image;
pub mod types;
pub mod version;

pub use artifact::{Graph, GraphEdge, GraphNode, ToolRow, ToolTable};
pub use checksum::{checksum, checksum_opt, CHECKSUM_ALGORITHM};
pub use entry::{DescriptorLanguage, Entry, EntryKind, Provider, SourceLocator};
pub use identity::{compute_entry_id, compute_version_id};
pub use image::{
    dedup_images, ImageDigest, ImageReference, ImageSpec, ImageSpecifier, DEFAULT_REGISTRY,
    DEFAULT_TAG,
};
pub use types::{Checksum, Digest, EntryId, VersionId};
pub use version::{
    Diagnostics, FileType, ImageFailure, ParsedInfo, ReferenceKind, SourceFile, Version,
    VersionMetadata, VersionState,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid image spec '{spec}': {reason}")]
    InvalidImageSpec { spec: String, reason: String },
    #[error("unknown descriptor language: {0}")]
    UnknownLanguage(String),
    #[error("unknown source-control provider: {0}")]
    UnknownProvider(String),
    #[error("invalid source locator '{0}': expected org/repo[/name]")]
    InvalidLocator(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
