//! Clients for the external systems Dockyard mirrors.
//!
//! This crate provides the `SourceControl` capability (descriptor fetches and
//! reference listing against GitHub, GitLab and Bitbucket), the
//! `RegistryClient` capability with a Docker Distribution v2 implementation
//! and a Quay REST implementation, host-keyed client selection, and the
//! endpoint configuration for both.

pub mod config;
pub mod http;
pub mod manifest;
pub mod registry;
pub mod scm;

pub use config::{ProviderEndpoint, RegistryFlavor, RegistryOverride, RegistrySettings, ScmConfig};
pub use registry::{
    select_registry_client, DistributionClient, QuayClient, RegistryClient, RegistryClients,
};
pub use scm::{HttpSourceControl, RemoteReference, SourceControl};

use thiserror::Error;

/// User agent sent on every outbound request.
pub const USER_AGENT: &str = concat!("dockyard/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported manifest: {0}")]
    UnsupportedManifest(String),
    #[error("remote config error: {0}")]
    Config(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}
