use crate::checksum::checksum;
use crate::image::ImageReference;
use crate::types::{Checksum, EntryId, VersionId};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Branch,
    Tag,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Branch => write!(f, "branch"),
            ReferenceKind::Tag => write!(f, "tag"),
        }
    }
}

/// Lifecycle state of a version. Derived from the frozen flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionState {
    Mutable,
    Frozen,
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionState::Mutable => write!(f, "mutable"),
            VersionState::Frozen => write!(f, "frozen"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    PrimaryDescriptor,
    ImportedDescriptor,
    TestParameter,
}

/// One descriptor or imported file of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path as written by the importer.
    pub path: String,
    /// Normalized path, or the URL for HTTP imports. Unique within a version.
    pub absolute_path: String,
    pub file_type: FileType,
    pub content: String,
    pub checksum: Checksum,
}

impl SourceFile {
    pub fn new(
        path: impl Into<String>,
        absolute_path: impl Into<String>,
        file_type: FileType,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            absolute_path: absolute_path.into(),
            file_type,
            checksum: checksum(content.as_bytes()),
            content,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedInfo {
    pub has_local_imports: bool,
    pub has_http_imports: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFailure {
    pub spec: String,
    pub reason: String,
}

/// Non-fatal problems observed by the last synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    #[serde(default)]
    pub missing_files: Vec<String>,
    #[serde(default)]
    pub image_failures: Vec<ImageFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.missing_files.is_empty() && self.image_failures.is_empty() && self.parse_error.is_none()
    }
}

/// One branch or tag of an entry as last synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    /// Lookup key only; the entry owns the version.
    pub entry_id: EntryId,
    pub reference: String,
    pub reference_kind: ReferenceKind,
    /// Sorted by absolute path.
    pub files: Vec<SourceFile>,
    /// Sorted by spec.
    pub images: Vec<ImageReference>,
    pub valid: bool,
    pub frozen: bool,
    /// Serialized dependency graph, absent until requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<String>,
    /// Serialized tool table, absent until requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_table: Option<String>,
    #[serde(default)]
    pub metadata: VersionMetadata,
    #[serde(default)]
    pub parsed_info: ParsedInfo,
    #[serde(default)]
    pub diagnostics: Diagnostics,
    /// Bumped on every committed write; used for optimistic concurrency.
    pub revision: u64,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
}

impl Version {
    /// A fresh, never-committed version.
    pub fn new(
        id: VersionId,
        entry_id: EntryId,
        reference: impl Into<String>,
        reference_kind: ReferenceKind,
    ) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id,
            entry_id,
            reference: reference.into(),
            reference_kind,
            files: Vec::new(),
            images: Vec::new(),
            valid: false,
            frozen: false,
            graph: None,
            tool_table: None,
            metadata: VersionMetadata::default(),
            parsed_info: ParsedInfo::default(),
            diagnostics: Diagnostics::default(),
            revision: 0,
            created_at: now.clone(),
            updated_at: now,
            synced_at: None,
        }
    }

    pub fn state(&self) -> VersionState {
        if self.frozen {
            VersionState::Frozen
        } else {
            VersionState::Mutable
        }
    }

    pub fn file(&self, absolute_path: &str) -> Option<&SourceFile> {
        self.files.iter().find(|f| f.absolute_path == absolute_path)
    }

    pub fn primary_file(&self) -> Option<&SourceFile> {
        self.files
            .iter()
            .find(|f| f.file_type == FileType::PrimaryDescriptor)
    }

    pub fn clear_derived(&mut self) {
        self.graph = None;
        self.tool_table = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Version {
        Version::new(
            VersionId::new("v1"),
            EntryId::new("e1"),
            "main",
            ReferenceKind::Branch,
        )
    }

    #[test]
    fn new_version_is_mutable_and_empty() {
        let v = sample();
        assert_eq!(v.state(), VersionState::Mutable);
        assert_eq!(v.revision, 0);
        assert!(v.files.is_empty());
        assert!(v.graph.is_none());
    }

    #[test]
    fn source_file_checksum_matches_content() {
        let f = SourceFile::new(
            "lib/a.cwl",
            "/lib/a.cwl",
            FileType::ImportedDescriptor,
            "class: CommandLineTool\n",
        );
        assert_eq!(f.checksum, checksum(b"class: CommandLineTool\n"));
    }

    #[test]
    fn clear_derived_drops_both_artifacts() {
        let mut v = sample();
        v.graph = Some("{}".to_owned());
        v.tool_table = Some("[]".to_owned());
        v.clear_derived();
        assert!(v.graph.is_none());
        assert!(v.tool_table.is_none());
    }

    #[test]
    fn file_lookup_by_absolute_path() {
        let mut v = sample();
        v.files.push(SourceFile::new(
            "wf.cwl",
            "/wf.cwl",
            FileType::PrimaryDescriptor,
            "x",
        ));
        assert!(v.file("/wf.cwl").is_some());
        assert!(v.file("/other.cwl").is_none());
        assert_eq!(v.primary_file().unwrap().path, "wf.cwl");
    }

    #[test]
    fn diagnostics_clean_by_default() {
        let mut d = Diagnostics::default();
        assert!(d.is_clean());
        d.missing_files.push("/lib/gone.cwl".to_owned());
        assert!(!d.is_clean());
    }

    #[test]
    fn version_serde_roundtrip() {
        let v = sample();
        let json = serde_json::to_string(&v).unwrap();
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }
}
