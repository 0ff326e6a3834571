use crate::types::EntryId;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Descriptor language of an entry. The configured language is authoritative
/// for every version of the entry; it is never re-detected per reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorLanguage {
    Cwl,
    Wdl,
    Nextflow,
    Galaxy,
    Snakemake,
}

impl fmt::Display for DescriptorLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorLanguage::Cwl => write!(f, "cwl"),
            DescriptorLanguage::Wdl => write!(f, "wdl"),
            DescriptorLanguage::Nextflow => write!(f, "nextflow"),
            DescriptorLanguage::Galaxy => write!(f, "galaxy"),
            DescriptorLanguage::Snakemake => write!(f, "snakemake"),
        }
    }
}

impl FromStr for DescriptorLanguage {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cwl" => Ok(Self::Cwl),
            "wdl" => Ok(Self::Wdl),
            "nextflow" | "nfl" => Ok(Self::Nextflow),
            "galaxy" | "gxformat2" => Ok(Self::Galaxy),
            "snakemake" | "smk" => Ok(Self::Snakemake),
            other => Err(SchemaError::UnknownLanguage(other.to_owned())),
        }
    }
}

/// Source-control hosting provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
    Bitbucket,
}

impl Provider {
    pub fn host(self) -> &'static str {
        match self {
            Provider::GitHub => "github.com",
            Provider::GitLab => "gitlab.com",
            Provider::Bitbucket => "bitbucket.org",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host())
    }
}

impl FromStr for Provider {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" | "github.com" => Ok(Self::GitHub),
            "gitlab" | "gitlab.com" => Ok(Self::GitLab),
            "bitbucket" | "bitbucket.org" => Ok(Self::Bitbucket),
            other => Err(SchemaError::UnknownProvider(other.to_owned())),
        }
    }
}

/// Where an entry's descriptors live upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocator {
    pub provider: Provider,
    pub organization: String,
    pub repository: String,
    /// Distinguishes several entries registered from one repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<String>,
}

impl SourceLocator {
    /// Parse `org/repo` or `org/repo/name` for the given provider.
    pub fn parse(provider: Provider, path: &str) -> Result<Self, SchemaError> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            [org, repo] if !org.is_empty() && !repo.is_empty() => Ok(Self {
                provider,
                organization: (*org).to_owned(),
                repository: (*repo).to_owned(),
                workflow_name: None,
            }),
            [org, repo, name] if !org.is_empty() && !repo.is_empty() && !name.is_empty() => {
                Ok(Self {
                    provider,
                    organization: (*org).to_owned(),
                    repository: (*repo).to_owned(),
                    workflow_name: Some((*name).to_owned()),
                })
            }
            _ => Err(SchemaError::InvalidLocator(path.to_owned())),
        }
    }

    /// `org/repo`, the identifier source-control APIs expect.
    pub fn repo_path(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }

    /// Human-facing catalog path, e.g. `github.com/org/repo/name`.
    pub fn display_path(&self) -> String {
        match &self.workflow_name {
            Some(name) => format!("{}/{}/{name}", self.provider, self.repo_path()),
            None => format!("{}/{}", self.provider, self.repo_path()),
        }
    }
}

/// Kind-specific payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Workflow {
        #[serde(default)]
        is_checker: bool,
    },
    Tool {
        registry: String,
        namespace: String,
        name: String,
    },
}

impl EntryKind {
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Workflow { is_checker: false } => "workflow",
            EntryKind::Workflow { is_checker: true } => "checker",
            EntryKind::Tool { .. } => "tool",
        }
    }
}

/// A registered catalog item. Versions are owned by the entry and stored
/// separately, keyed by `VersionId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub path: String,
    pub source: SourceLocator,
    pub language: DescriptorLanguage,
    pub primary_descriptor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_parameter: Option<String>,
    #[serde(flatten)]
    pub kind: EntryKind,
    pub created_at: String,
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parse_accepts_aliases() {
        assert_eq!(
            "CWL".parse::<DescriptorLanguage>().unwrap(),
            DescriptorLanguage::Cwl
        );
        assert_eq!(
            "nfl".parse::<DescriptorLanguage>().unwrap(),
            DescriptorLanguage::Nextflow
        );
        assert!("cobol".parse::<DescriptorLanguage>().is_err());
    }

    #[test]
    fn locator_parse_two_and_three_parts() {
        let loc = SourceLocator::parse(Provider::GitHub, "org/repo").unwrap();
        assert_eq!(loc.repo_path(), "org/repo");
        assert_eq!(loc.display_path(), "github.com/org/repo");

        let named = SourceLocator::parse(Provider::GitLab, "/org/repo/align/").unwrap();
        assert_eq!(named.workflow_name.as_deref(), Some("align"));
        assert_eq!(named.display_path(), "gitlab.com/org/repo/align");
    }

    #[test]
    fn locator_parse_rejects_bad_paths() {
        assert!(SourceLocator::parse(Provider::GitHub, "org").is_err());
        assert!(SourceLocator::parse(Provider::GitHub, "org//x").is_err());
        assert!(SourceLocator::parse(Provider::GitHub, "a/b/c/d").is_err());
    }

    #[test]
    fn entry_kind_is_tagged() {
        let kind = EntryKind::Tool {
            registry: "quay.io".to_owned(),
            namespace: "biocontainers".to_owned(),
            name: "samtools".to_owned(),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "tool");
        assert_eq!(json["namespace"], "biocontainers");
        assert_eq!(kind.label(), "tool");
        assert_eq!(EntryKind::Workflow { is_checker: true }.label(), "checker");
    }

    #[test]
    fn entry_serde_roundtrip_with_flattened_kind() {
        let entry = Entry {
            id: EntryId::new("e1"),
            path: "github.com/org/repo".to_owned(),
            source: SourceLocator::parse(Provider::GitHub, "org/repo").unwrap(),
            language: DescriptorLanguage::Wdl,
            primary_descriptor: "/main.wdl".to_owned(),
            test_parameter: None,
            kind: EntryKind::Workflow { is_checker: false },
            created_at: "2024-01-01T00:00:00Z".to_owned(),
            updated_at: "2024-01-01T00:00:00Z".to_owned(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
