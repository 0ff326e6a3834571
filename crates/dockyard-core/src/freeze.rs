use dockyard_schema::{ImageReference, Version};
use thiserror::Error;

/// A version cannot be frozen because some images are not pinned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Snapshot for workflow version {reference} failed because not all images are specified using a digest nor a valid tag. Offending images: {}",
    .offenders.join(", ")
)]
pub struct FreezeError {
    pub reference: String,
    /// Offending image specs, ordered as stored.
    pub offenders: Vec<String>,
}

/// Every image must carry at least one resolved digest and be pinned by
/// digest or by a tag other than `latest`, and so must every spec merged
/// into it. Parameters and unparseable specs never qualify.
pub fn check_freezable(version: &Version) -> Result<(), FreezeError> {
    let offenders: Vec<String> = version
        .images
        .iter()
        .flat_map(ImageReference::unfreezable_specs)
        .map(str::to_owned)
        .collect();
    if offenders.is_empty() {
        Ok(())
    } else {
        Err(FreezeError {
            reference: version.reference.clone(),
            offenders,
        })
    }
}
