//! Descriptor import resolution.
//!
//! Starting from the primary descriptor, imports are walked breadth-first.
//! The files of one level are fetched concurrently; a mutex-guarded seen set
//! makes every absolute path fetched at most once, so cycles and diamonds
//! terminate. A missing primary descriptor is fatal, a missing import is
//! recorded and skipped.

use crate::concurrency::{bounded_map, CancelToken};
use crate::parse::DescriptorParser;
use crate::CoreError;
use dockyard_remote::{RemoteError, SourceControl};
use dockyard_schema::{FileType, ParsedInfo, SourceFile, SourceLocator, Version};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use url::Url;

/// One fetched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Path as written by the importer.
    pub path: String,
    /// Normalized repository path, or the URL of an HTTP import.
    pub absolute_path: String,
    pub file_type: FileType,
    pub content: String,
}

impl ResolvedFile {
    pub fn is_http(&self) -> bool {
        is_http(&self.absolute_path)
    }
}

/// Every file of a version, keyed by absolute path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    primary: String,
    files: BTreeMap<String, ResolvedFile>,
    missing: Vec<String>,
    has_local_imports: bool,
    has_http_imports: bool,
}

impl FileSet {
    pub fn new(primary_path: &str) -> Self {
        Self {
            primary: normalize_path("/", primary_path),
            ..Self::default()
        }
    }

    /// Rebuild the set from a stored version, e.g. to re-parse it.
    pub fn from_version(version: &Version) -> Self {
        let mut set = Self::default();
        for f in &version.files {
            if f.file_type == FileType::PrimaryDescriptor {
                set.primary.clone_from(&f.absolute_path);
            }
            set.insert(ResolvedFile {
                path: f.path.clone(),
                absolute_path: f.absolute_path.clone(),
                file_type: f.file_type,
                content: f.content.clone(),
            });
        }
        set.has_local_imports = version.parsed_info.has_local_imports;
        set.has_http_imports = version.parsed_info.has_http_imports;
        set.missing.clone_from(&version.diagnostics.missing_files);
        set
    }

    pub fn insert(&mut self, file: ResolvedFile) {
        self.files.insert(file.absolute_path.clone(), file);
    }

    pub fn primary_path(&self) -> &str {
        &self.primary
    }

    pub fn primary(&self) -> Option<&ResolvedFile> {
        self.files.get(&self.primary)
    }

    pub fn get(&self, absolute_path: &str) -> Option<&ResolvedFile> {
        self.files.get(absolute_path)
    }

    pub fn contains(&self, absolute_path: &str) -> bool {
        self.files.contains_key(absolute_path)
    }

    /// Files in absolute-path order.
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedFile> {
        self.files.values()
    }

    /// Descriptor files only, primary included.
    pub fn descriptors(&self) -> impl Iterator<Item = &ResolvedFile> {
        self.files
            .values()
            .filter(|f| f.file_type != FileType::TestParameter)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Imports and test parameters that could not be fetched.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    pub fn record_missing(&mut self, path: String) {
        if !self.missing.contains(&path) {
            self.missing.push(path);
            self.missing.sort();
        }
    }

    pub fn parsed_info(&self) -> ParsedInfo {
        ParsedInfo {
            has_local_imports: self.has_local_imports,
            has_http_imports: self.has_http_imports,
        }
    }

    pub fn set_import_flags(&mut self, local: bool, http: bool) {
        self.has_local_imports = local;
        self.has_http_imports = http;
    }

    /// Source files in absolute-path order, checksummed.
    pub fn to_source_files(&self) -> Vec<SourceFile> {
        self.files
            .values()
            .map(|f| SourceFile::new(&f.path, &f.absolute_path, f.file_type, &f.content))
            .collect()
    }
}

pub(crate) fn is_http(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Join `rel` onto directory `base` and collapse `.` and `..`. The result
/// is rooted at `/`; `..` never climbs above it.
pub fn normalize_path(base: &str, rel: &str) -> String {
    let joined = if rel.starts_with('/') {
        rel.to_owned()
    } else {
        format!("{base}/{rel}")
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Resolve an import target against the absolute path (or URL) of the
/// file that imports it.
pub fn resolve_import(importer: &str, target: &str) -> String {
    if is_http(target) {
        return target.to_owned();
    }
    if is_http(importer) {
        return match Url::parse(importer).and_then(|base| base.join(target)) {
            Ok(url) => url.into(),
            Err(e) => {
                debug!("cannot resolve '{target}' against {importer}: {e}");
                target.to_owned()
            }
        };
    }
    normalize_path(parent_dir(importer), target)
}

#[derive(Debug, Clone)]
struct Pending {
    written: String,
    absolute: String,
}

/// Walks the imports of one version.
pub struct ImportResolver<'a> {
    scm: &'a dyn SourceControl,
    parser: &'a dyn DescriptorParser,
    workers: usize,
    cancel: &'a CancelToken,
}

impl<'a> ImportResolver<'a> {
    pub fn new(
        scm: &'a dyn SourceControl,
        parser: &'a dyn DescriptorParser,
        workers: usize,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            scm,
            parser,
            workers: workers.max(1),
            cancel,
        }
    }

    fn fetch(
        &self,
        source: &SourceLocator,
        reference: &str,
        absolute: &str,
    ) -> Result<String, RemoteError> {
        let bytes = if is_http(absolute) {
            self.scm.fetch_http(absolute)?
        } else {
            self.scm
                .fetch_file(source, reference, absolute.trim_start_matches('/'))?
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn pending_imports(&self, importer: &str, content: &str) -> Vec<Pending> {
        self.parser
            .imports(importer, content)
            .into_iter()
            .map(|i| Pending {
                absolute: resolve_import(importer, &i.target),
                written: i.target,
            })
            .collect()
    }

    /// Fetch the primary descriptor, every transitive import, and the test
    /// parameter file if one is configured.
    pub fn resolve(
        &self,
        source: &SourceLocator,
        reference: &str,
        primary_path: &str,
        test_parameter: Option<&str>,
    ) -> Result<FileSet, CoreError> {
        let mut set = FileSet::new(primary_path);
        let primary_abs = set.primary_path().to_owned();

        self.cancel.check()?;
        let content = match self.fetch(source, reference, &primary_abs) {
            Ok(c) => c,
            Err(e) if e.is_not_found() => {
                return Err(CoreError::PrimaryDescriptorMissing {
                    path: primary_path.to_owned(),
                    reference: reference.to_owned(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let mut level = self.pending_imports(&primary_abs, &content);
        set.insert(ResolvedFile {
            path: primary_path.to_owned(),
            absolute_path: primary_abs.clone(),
            file_type: FileType::PrimaryDescriptor,
            content,
        });

        let seen = Mutex::new(HashSet::from([primary_abs]));
        let mut has_local = false;
        let mut has_http = false;
        let mut depth = 0;

        while !level.is_empty() {
            self.cancel.check()?;
            depth += 1;
            has_local |= level.iter().any(|p| !is_http(&p.absolute));
            has_http |= level.iter().any(|p| is_http(&p.absolute));

            let fetched = bounded_map(&level, self.workers, |pending| {
                let first_visit = seen
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(pending.absolute.clone());
                if !first_visit || self.cancel.is_cancelled() {
                    return None;
                }
                Some(self.fetch(source, reference, &pending.absolute))
            });
            self.cancel.check()?;

            let mut next = Vec::new();
            for (pending, result) in level.into_iter().zip(fetched) {
                match result {
                    None => {}
                    Some(Ok(content)) => {
                        debug!("import {} (level {depth})", pending.absolute);
                        next.extend(self.pending_imports(&pending.absolute, &content));
                        set.insert(ResolvedFile {
                            path: pending.written,
                            absolute_path: pending.absolute,
                            file_type: FileType::ImportedDescriptor,
                            content,
                        });
                    }
                    Some(Err(e)) => {
                        warn!("import {} unavailable: {e}", pending.absolute);
                        set.record_missing(pending.absolute);
                    }
                }
            }
            level = next;
        }
        set.set_import_flags(has_local, has_http);

        if let Some(param) = test_parameter {
            self.cancel.check()?;
            let abs = normalize_path("/", param);
            match self.fetch(source, reference, &abs) {
                Ok(content) => set.insert(ResolvedFile {
                    path: param.to_owned(),
                    absolute_path: abs,
                    file_type: FileType::TestParameter,
                    content,
                }),
                Err(e) => {
                    warn!("test parameter file {abs} unavailable: {e}");
                    set.record_missing(abs);
                }
            }
        }

        debug!(
            "resolved {} file(s), {} missing, for {} at {reference}",
            set.len(),
            set.missing().len(),
            source.display_path()
        );
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots() {
        assert_eq!(normalize_path("/wf", "../tools/./a.cwl"), "/tools/a.cwl");
        assert_eq!(normalize_path("/", "main.cwl"), "/main.cwl");
        assert_eq!(normalize_path("/a/b", "/c.cwl"), "/c.cwl");
        assert_eq!(normalize_path("/", "../../x.wdl"), "/x.wdl");
    }

    #[test]
    fn resolve_relative_against_importer_dir() {
        assert_eq!(resolve_import("/wf/main.cwl", "tools/a.cwl"), "/wf/tools/a.cwl");
        assert_eq!(resolve_import("/main.cwl", "./a.cwl"), "/a.cwl");
    }

    #[test]
    fn resolve_inside_http_import_stays_on_that_host() {
        assert_eq!(
            resolve_import("https://example.org/lib/v1/tool.cwl", "../common/types.yml"),
            "https://example.org/lib/common/types.yml"
        );
        assert_eq!(
            resolve_import("https://example.org/lib/tool.cwl?raw=1", "/abs.cwl"),
            "https://example.org/abs.cwl"
        );
        assert_eq!(
            resolve_import("/main.cwl", "https://example.org/x.cwl"),
            "https://example.org/x.cwl"
        );
        assert_eq!(
            resolve_import("https://example.org/tool.cwl", "../../my tool.cwl"),
            "https://example.org/my%20tool.cwl"
        );
    }

    #[test]
    fn file_set_roundtrips_through_version() {
        let mut set = FileSet::new("wf/main.cwl");
        set.insert(ResolvedFile {
            path: "wf/main.cwl".to_owned(),
            absolute_path: "/wf/main.cwl".to_owned(),
            file_type: FileType::PrimaryDescriptor,
            content: "cwlVersion: v1.2\n".to_owned(),
        });
        set.insert(ResolvedFile {
            path: "a.cwl".to_owned(),
            absolute_path: "/wf/a.cwl".to_owned(),
            file_type: FileType::ImportedDescriptor,
            content: "class: CommandLineTool\n".to_owned(),
        });
        set.set_import_flags(true, false);
        set.record_missing("/wf/b.cwl".to_owned());
        set.record_missing("/wf/b.cwl".to_owned());

        let mut version = Version::new(
            dockyard_schema::VersionId::new("v"),
            dockyard_schema::EntryId::new("e"),
            "main",
            dockyard_schema::ReferenceKind::Branch,
        );
        version.files = set.to_source_files();
        version.parsed_info = set.parsed_info();
        version.diagnostics.missing_files = set.missing().to_vec();

        let back = FileSet::from_version(&version);
        assert_eq!(back, set);
        assert_eq!(back.primary().unwrap().content, "cwlVersion: v1.2\n");
        assert_eq!(back.missing(), ["/wf/b.cwl"]);
    }
}
