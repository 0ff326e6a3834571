//! Container image resolution for one version.
//!
//! Every declared spec is parsed and resolved against its registry on a
//! bounded worker pool. A spec that fails to resolve, or resolves to
//! nothing, keeps the digests a previous synchronization recorded for it,
//! so a flaky registry never erases known-good data. A spec that cannot be
//! parsed stays on the version as an invalid reference.

use crate::concurrency::{bounded_map, CancelToken};
use crate::CoreError;
use dockyard_remote::RegistryClients;
use dockyard_schema::{dedup_images, ImageFailure, ImageReference, ImageSpec, ImageSpecifier};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageResolution {
    /// De-duplicated, ordered by spec.
    pub images: Vec<ImageReference>,
    /// Ordered by spec.
    pub failures: Vec<ImageFailure>,
}

enum Resolved {
    Reference(ImageReference),
    Failed(Option<ImageReference>, ImageFailure),
    Skipped,
}

pub struct ImageResolver<'a> {
    registries: &'a RegistryClients,
    workers: usize,
    cancel: &'a CancelToken,
}

/// The previously recorded reference for `spec`: one written with the same
/// spec text (directly or as a merged alias), or a reference to the same
/// repository with the same tag or digest.
pub(crate) fn recorded_for<'p>(
    spec: &ImageSpec,
    previous: &'p [ImageReference],
) -> Option<&'p ImageReference> {
    previous
        .iter()
        .find(|p| p.written_as(&spec.raw))
        .or_else(|| {
            previous.iter().find(|p| {
                p.registry == spec.registry
                    && p.repository == spec.repository
                    && match &spec.digest {
                        Some(d) => p.digest.as_ref() == Some(d),
                        None => p.tag.as_deref() == Some(spec.effective_tag()),
                    }
            })
        })
        .filter(|p| !p.digests.is_empty())
}

/// `prev` re-labelled with the spec currently written in the descriptor.
fn carried_over(spec: &ImageSpec, prev: &ImageReference) -> ImageReference {
    ImageReference::resolved(spec, prev.digests.clone())
}

impl<'a> ImageResolver<'a> {
    pub fn new(registries: &'a RegistryClients, workers: usize, cancel: &'a CancelToken) -> Self {
        Self {
            registries,
            workers: workers.max(1),
            cancel,
        }
    }

    fn resolve_one(
        &self,
        raw: &str,
        previous: &[ImageReference],
        force_full: bool,
    ) -> Resolved {
        if self.cancel.is_cancelled() {
            return Resolved::Skipped;
        }
        let spec = match ImageSpec::parse(raw) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("unparseable image spec '{raw}': {e}");
                return Resolved::Failed(
                    Some(ImageReference::invalid(raw)),
                    ImageFailure {
                        spec: raw.to_owned(),
                        reason: e.to_string(),
                    },
                );
            }
        };
        if spec.is_parameter() {
            debug!("image '{raw}' is a runtime parameter, not resolved");
            return Resolved::Reference(ImageReference::unresolved(&spec));
        }

        let prev = recorded_for(&spec, previous);
        if let (false, ImageSpecifier::Digest, Some(prev)) = (force_full, spec.specifier, prev) {
            debug!("image '{raw}' pinned by digest and already resolved");
            return Resolved::Reference(carried_over(&spec, prev));
        }

        let client = self.registries.client_for(&spec.registry);
        let reason = match client.resolve(&spec) {
            Ok(digests) if !digests.is_empty() => {
                debug!("image '{raw}' resolved to {} digest(s)", digests.len());
                return Resolved::Reference(ImageReference::resolved(&spec, digests));
            }
            Ok(_) => "registry returned no platform images".to_owned(),
            Err(e) => e.to_string(),
        };
        warn!("image '{raw}' failed to resolve: {reason}");
        let kept = prev.map_or_else(
            || ImageReference::unresolved(&spec),
            |p| carried_over(&spec, p),
        );
        Resolved::Failed(
            Some(kept),
            ImageFailure {
                spec: raw.to_owned(),
                reason,
            },
        )
    }

    /// Resolve `declared` specs. `previous` is the image list of the last
    /// committed synchronization, consulted for non-regression and for
    /// skipping digest-pinned specs unless `force_full` is set.
    pub fn resolve(
        &self,
        declared: &[String],
        previous: &[ImageReference],
        force_full: bool,
    ) -> Result<ImageResolution, CoreError> {
        self.cancel.check()?;
        let outcomes = bounded_map(declared, self.workers, |raw| {
            self.resolve_one(raw, previous, force_full)
        });
        self.cancel.check()?;

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Resolved::Reference(image) => images.push(image),
                Resolved::Failed(kept, failure) => {
                    images.extend(kept);
                    failures.push(failure);
                }
                Resolved::Skipped => return Err(CoreError::Cancelled),
            }
        }
        failures.sort_by(|a, b| a.spec.cmp(&b.spec));
        Ok(ImageResolution {
            images: dedup_images(images),
            failures,
        })
    }
}
