//! Container image specs as written in descriptors, and their resolved form.

use crate::types::Digest;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Registry assumed when a spec names no host.
pub const DEFAULT_REGISTRY: &str = "docker.io";

/// Floating tag; also the implicit tag of a spec without tag or digest.
pub const DEFAULT_TAG: &str = "latest";

/// Substrings marking a spec as a runtime parameter (CWL, WDL, Nextflow).
const PARAMETER_MARKERS: [&str; 3] = ["${", "$(", "~{"];

/// How an image was written in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSpecifier {
    Tag,
    Digest,
    Parameter,
    None,
    /// The spec could not be parsed; kept so the version still lists it.
    Invalid,
}

impl fmt::Display for ImageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSpecifier::Tag => write!(f, "tag"),
            ImageSpecifier::Digest => write!(f, "digest"),
            ImageSpecifier::Parameter => write!(f, "parameter"),
            ImageSpecifier::None => write!(f, "none"),
            ImageSpecifier::Invalid => write!(f, "invalid"),
        }
    }
}

/// A parsed image spec.
///
/// Supports formats:
/// - `ubuntu` → docker.io/library/ubuntu (implicit latest)
/// - `repo/x:1.0` → docker.io/repo/x:1.0
/// - `quay.io/org/image@sha256:abc...` → quay.io/org/image@sha256:abc...
/// - `localhost:5000/img:dev` → localhost:5000/img:dev
/// - `$(inputs.image)` → runtime parameter, never resolvable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSpec {
    pub raw: String,
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<Digest>,
    pub specifier: ImageSpecifier,
}

impl ImageSpec {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "empty image spec"));
        }

        if PARAMETER_MARKERS.iter().any(|m| raw.contains(m)) {
            return Ok(Self {
                raw: raw.to_owned(),
                registry: String::new(),
                repository: raw.to_owned(),
                tag: None,
                digest: None,
                specifier: ImageSpecifier::Parameter,
            });
        }

        let (name_tag, digest) = match raw.rfind('@') {
            Some(at) => {
                let digest = &raw[at + 1..];
                if !digest.contains(':') {
                    return Err(invalid(raw, "digest must be algorithm:hex"));
                }
                (&raw[..at], Some(Digest::new(digest)))
            }
            None => (raw, None),
        };

        let (name, tag) = split_tag(name_tag);
        if tag.as_deref() == Some("") {
            return Err(invalid(raw, "empty tag"));
        }
        let (registry, repository) = split_registry(raw, name)?;

        let specifier = if digest.is_some() {
            ImageSpecifier::Digest
        } else if tag.is_some() {
            ImageSpecifier::Tag
        } else {
            ImageSpecifier::None
        };

        Ok(Self {
            raw: raw.to_owned(),
            registry,
            repository,
            tag,
            digest,
            specifier,
        })
    }

    /// Tag to query when the spec has no digest.
    pub fn effective_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// Pinned: an explicit digest, or a non-latest tag. Never a parameter.
    pub fn is_pinned(&self) -> bool {
        match self.specifier {
            ImageSpecifier::Digest => true,
            ImageSpecifier::Tag => self.effective_tag() != DEFAULT_TAG,
            ImageSpecifier::Parameter | ImageSpecifier::None | ImageSpecifier::Invalid => false,
        }
    }

    pub fn is_parameter(&self) -> bool {
        self.specifier == ImageSpecifier::Parameter
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(spec: &str, reason: &str) -> SchemaError {
    SchemaError::InvalidImageSpec {
        spec: spec.to_owned(),
        reason: reason.to_owned(),
    }
}

/// Split `name[:tag]`, where the tag colon must follow the last slash and a
/// purely numeric suffix on a slash-less name is a registry port.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let last_segment_start = name_tag.rfind('/').map_or(0, |p| p + 1);
    let last_segment = &name_tag[last_segment_start..];
    match last_segment.rfind(':') {
        Some(colon) => {
            let tag = &last_segment[colon + 1..];
            if last_segment_start == 0 && !tag.is_empty() && tag.bytes().all(|b| b.is_ascii_digit())
            {
                return (name_tag, None);
            }
            (
                &name_tag[..last_segment_start + colon],
                Some(tag.to_owned()),
            )
        }
        None => (name_tag, None),
    }
}

fn split_registry(raw: &str, name: &str) -> Result<(String, String), SchemaError> {
    if let Some(slash) = name.find('/') {
        let first = &name[..slash];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repository = &name[slash + 1..];
            if repository.is_empty() {
                return Err(invalid(raw, "empty repository"));
            }
            let registry = match first {
                "index.docker.io" | "registry-1.docker.io" | "registry.hub.docker.com" => {
                    DEFAULT_REGISTRY
                }
                other => other,
            };
            return Ok((registry.to_owned(), repository.to_owned()));
        }
    }
    if name.is_empty() {
        return Err(invalid(raw, "empty repository"));
    }
    let repository = if name.contains('/') {
        name.to_owned()
    } else {
        format!("library/{name}")
    };
    Ok((DEFAULT_REGISTRY.to_owned(), repository))
}

/// One registry-resolved image for a single platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageDigest {
    pub digest: Digest,
    pub size: u64,
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl ImageDigest {
    /// `linux/arm64/v8` style platform label.
    pub fn platform(&self) -> String {
        match &self.variant {
            Some(v) => format!("{}/{}/{v}", self.os, self.architecture),
            None => format!("{}/{}", self.os, self.architecture),
        }
    }
}

/// A container image used by a version, with its resolved digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub spec: String,
    pub registry: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<Digest>,
    pub specifier: ImageSpecifier,
    #[serde(default)]
    pub digests: Vec<ImageDigest>,
    /// Other specs written in the descriptors that resolved to the same
    /// images and were merged into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl ImageReference {
    /// A reference with no resolved digests.
    pub fn unresolved(spec: &ImageSpec) -> Self {
        Self {
            spec: spec.raw.clone(),
            registry: spec.registry.clone(),
            repository: spec.repository.clone(),
            tag: spec.tag.clone(),
            digest: spec.digest.clone(),
            specifier: spec.specifier,
            digests: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// A spec that failed to parse, recorded verbatim with no digests.
    pub fn invalid(raw: &str) -> Self {
        Self {
            spec: raw.trim().to_owned(),
            registry: String::new(),
            repository: String::new(),
            tag: None,
            digest: None,
            specifier: ImageSpecifier::Invalid,
            digests: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// A reference carrying resolved digests in canonical order.
    pub fn resolved(spec: &ImageSpec, mut digests: Vec<ImageDigest>) -> Self {
        digests.sort();
        digests.dedup();
        Self {
            digests,
            ..Self::unresolved(spec)
        }
    }

    pub fn is_pinned(&self) -> bool {
        match self.specifier {
            ImageSpecifier::Digest => true,
            ImageSpecifier::Tag => self.tag.as_deref().unwrap_or(DEFAULT_TAG) != DEFAULT_TAG,
            ImageSpecifier::Parameter | ImageSpecifier::None | ImageSpecifier::Invalid => false,
        }
    }

    /// Specs of this reference that block a snapshot: its own spec unless
    /// it is pinned and resolved, then every alias that is not pinned.
    pub fn unfreezable_specs(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if !self.is_pinned() || self.digests.is_empty() {
            out.push(self.spec.as_str());
        }
        out.extend(
            self.aliases
                .iter()
                .filter(|alias| !ImageSpec::parse(alias).is_ok_and(|s| s.is_pinned()))
                .map(String::as_str),
        );
        out
    }

    /// Eligible for a snapshot: pinned and resolved at least once, with
    /// every merged alias pinned too.
    pub fn is_freezable(&self) -> bool {
        self.unfreezable_specs().is_empty()
    }

    /// Whether `raw` is this reference's spec or one merged into it.
    pub fn written_as(&self, raw: &str) -> bool {
        self.spec == raw || self.aliases.iter().any(|a| a == raw)
    }

    pub fn digest_set(&self) -> BTreeSet<&str> {
        self.digests.iter().map(|d| d.digest.as_str()).collect()
    }

    fn pin_rank(&self) -> u8 {
        match self.specifier {
            ImageSpecifier::Digest => 3,
            ImageSpecifier::Tag if self.is_pinned() => 2,
            ImageSpecifier::Tag | ImageSpecifier::None => 1,
            ImageSpecifier::Parameter | ImageSpecifier::Invalid => 0,
        }
    }
}

/// Collapse references that resolve to the same registry, repository and
/// full digest set. Unresolved references only collapse with an identical
/// spec string, since an empty digest set says nothing about identity.
///
/// The surviving reference is the most strongly pinned of its group and
/// lists the other specs of the group as aliases. The result is ordered by
/// spec so repeated runs produce identical output.
pub fn dedup_images(images: Vec<ImageReference>) -> Vec<ImageReference> {
    let mut groups: BTreeMap<(String, String, Vec<String>), ImageReference> = BTreeMap::new();
    for image in images {
        let key = if image.digests.is_empty() {
            (String::new(), image.spec.clone(), Vec::new())
        } else {
            (
                image.registry.clone(),
                image.repository.clone(),
                image.digest_set().into_iter().map(str::to_owned).collect(),
            )
        };
        match groups.get_mut(&key) {
            Some(existing) => {
                let (mut kept, folded) = if image.pin_rank() > existing.pin_rank()
                    || (image.pin_rank() == existing.pin_rank() && image.spec < existing.spec)
                {
                    (image, existing.clone())
                } else {
                    (existing.clone(), image)
                };
                kept.aliases.push(folded.spec);
                kept.aliases.extend(folded.aliases);
                let own = kept.spec.clone();
                kept.aliases.retain(|a| *a != own);
                kept.aliases.sort();
                kept.aliases.dedup();
                *existing = kept;
            }
            None => {
                groups.insert(key, image);
            }
        }
    }
    let mut out: Vec<ImageReference> = groups.into_values().collect();
    out.sort_by(|a, b| a.spec.cmp(&b.spec));
    out
}
