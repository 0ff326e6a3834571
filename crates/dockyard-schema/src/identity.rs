use crate::entry::SourceLocator;
use crate::types::{EntryId, VersionId};

/// Deterministic entry identity derived from the source locator.
///
/// Registering the same repository path twice yields the same id, so
/// registration is idempotent.
pub fn compute_entry_id(source: &SourceLocator) -> EntryId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("provider:{}", source.provider).as_bytes());
    hasher.update(format!("org:{}", source.organization).as_bytes());
    hasher.update(format!("repo:{}", source.repository).as_bytes());
    if let Some(name) = &source.workflow_name {
        hasher.update(format!("name:{name}").as_bytes());
    }
    EntryId::new(hasher.finalize().to_hex().to_string())
}

/// Deterministic version identity: one record per (entry, reference).
pub fn compute_version_id(entry_id: &EntryId, reference: &str) -> VersionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(format!("entry:{entry_id}").as_bytes());
    hasher.update(format!("ref:{reference}").as_bytes());
    VersionId::new(hasher.finalize().to_hex().to_string())
}
