//! Image manifest and index parsing.
//!
//! Bodies are read into the `oci-spec` index and manifest types. Docker v2
//! schema 2 manifest lists and manifests share those shapes, so only the
//! media-type decision between the two is made here.

use crate::RemoteError;
use dockyard_schema::{Digest, ImageDigest};
use oci_spec::image::{Descriptor, ImageConfiguration, ImageIndex, ImageManifest};
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

pub const MEDIA_TYPE_DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Accept header offering every manifest shape we can parse, lists first.
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.oci.image.manifest.v1+json";

/// Platform label of attestation manifests and unreadable configs.
const UNKNOWN: &str = "unknown";

/// Just enough of a body to pick the type to read it as.
#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "schemaVersion", default)]
    schema_version: Option<u32>,
    #[serde(rename = "mediaType", default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Option<serde::de::IgnoredAny>,
}

/// A parsed manifest: either a multi-platform index or a single image.
#[derive(Debug, Clone)]
pub enum Manifest {
    Index(ImageIndex),
    Image(ImageManifest),
}

fn invalid(e: impl std::fmt::Display) -> RemoteError {
    RemoteError::Serialization(format!("invalid manifest: {e}"))
}

pub fn parse_manifest(body: &[u8], content_type: Option<&str>) -> Result<Manifest, RemoteError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(invalid)?;
    if envelope.schema_version == Some(1) {
        return Err(RemoteError::UnsupportedManifest(
            "schema version 1".to_owned(),
        ));
    }

    let media_type = envelope
        .media_type
        .as_deref()
        .or(content_type)
        .map(|m| m.split(';').next().unwrap_or(m).trim().to_owned());
    let is_index = match media_type.as_deref() {
        Some(MEDIA_TYPE_DOCKER_LIST | MEDIA_TYPE_OCI_INDEX) => true,
        Some(MEDIA_TYPE_DOCKER_MANIFEST | MEDIA_TYPE_OCI_MANIFEST) => false,
        _ => envelope.manifests.is_some(),
    };

    if is_index {
        serde_json::from_slice::<ImageIndex>(body)
            .map(Manifest::Index)
            .map_err(invalid)
    } else {
        serde_json::from_slice::<ImageManifest>(body)
            .map(Manifest::Image)
            .map_err(invalid)
    }
}

fn size_of(descriptor: &Descriptor) -> u64 {
    u64::try_from(descriptor.size()).unwrap_or(0)
}

/// Total compressed size of an image's layers.
pub fn layers_size(manifest: &ImageManifest) -> u64 {
    manifest.layers().iter().map(size_of).sum()
}

/// Digest of an image's config blob.
pub fn config_digest(manifest: &ImageManifest) -> String {
    manifest.config().digest().to_string()
}

/// One [`ImageDigest`] per real platform of an index. Attestation and other
/// platform-less entries are skipped.
pub fn index_digests(index: &ImageIndex) -> Vec<ImageDigest> {
    index
        .manifests()
        .iter()
        .filter_map(|entry| {
            let platform = entry.platform().as_ref()?;
            let os = platform.os().to_string();
            let architecture = platform.architecture().to_string();
            if os == UNKNOWN || architecture == UNKNOWN {
                return None;
            }
            Some(ImageDigest {
                digest: Digest::new(entry.digest().to_string()),
                size: size_of(entry),
                os,
                architecture,
                variant: platform.variant().clone(),
            })
        })
        .collect()
}

/// Summary of an index pinned by its own digest: one entry whose
/// architecture lists every platform it covers.
pub fn index_summary(digest: &str, size: u64, index: &ImageIndex) -> ImageDigest {
    let platforms = index_digests(index);
    let mut os: Vec<&str> = platforms.iter().map(|d| d.os.as_str()).collect();
    os.sort_unstable();
    os.dedup();
    let mut arches: Vec<String> = platforms.iter().map(ImageDigest::platform).collect();
    arches.sort();
    ImageDigest {
        digest: Digest::new(digest),
        size,
        os: os.join(","),
        architecture: arches
            .iter()
            .map(|p| p.split_once('/').map_or(p.as_str(), |(_, a)| a))
            .collect::<Vec<_>>()
            .join(","),
        variant: None,
    }
}

/// Single-platform image digest. Without a readable config the platform
/// is `unknown/unknown`.
pub fn image_digest(digest: &str, size: u64, config: Option<&ImageConfiguration>) -> ImageDigest {
    let (os, architecture, variant) = config.map_or_else(
        || (UNKNOWN.to_owned(), UNKNOWN.to_owned(), None),
        |c| {
            (
                c.os().to_string(),
                c.architecture().to_string(),
                c.variant().clone(),
            )
        },
    );
    ImageDigest {
        digest: Digest::new(digest),
        size,
        os,
        architecture,
        variant,
    }
}

/// `sha256:<hex>` of a manifest body, for registries that omit
/// `Docker-Content-Digest`.
pub fn body_digest(body: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(body))
}
