//! Descriptor parsing.
//!
//! Each supported language implements [`DescriptorParser`]: it lists the
//! imports of one file so the import resolver can walk them, and extracts
//! validity, declared images, authorship metadata and workflow steps from a
//! resolved [`FileSet`]. CWL documents are read as YAML; the WDL and
//! Nextflow extractors are line-oriented and understand enough of each
//! language to drive synchronization, not full grammars.

pub mod cwl;
pub mod nextflow;
pub mod wdl;

use crate::imports::FileSet;
use crate::CoreError;
use dockyard_schema::{DescriptorLanguage, ParsedInfo, VersionMetadata};

/// An import as written in a descriptor: a relative path, a
/// repository-absolute path, or an HTTP(S) URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub target: String,
}

impl ImportRef {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

/// One workflow step or tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub id: String,
    /// Absolute path of the file defining the step's tool.
    pub file: String,
    pub image: Option<String>,
    /// Ids of steps whose outputs this step consumes.
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub valid: bool,
    /// Why the descriptor is invalid, when it is.
    pub error: Option<String>,
    /// Image specs as written, sorted and de-duplicated.
    pub declared_images: Vec<String>,
    pub metadata: VersionMetadata,
    pub parsed_info: ParsedInfo,
    pub steps: Vec<Step>,
}

impl ParseOutcome {
    pub(crate) fn invalid(reason: impl Into<String>, files: &FileSet) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
            parsed_info: files.parsed_info(),
            ..Self::default()
        }
    }
}

pub trait DescriptorParser: Send + Sync {
    fn language(&self) -> DescriptorLanguage;

    /// Imports of one file, in order of appearance.
    fn imports(&self, path: &str, content: &str) -> Vec<ImportRef>;

    /// Parse a resolved file set. Never fails: problems yield
    /// `valid = false` with whatever metadata could still be read.
    fn parse(&self, files: &FileSet) -> ParseOutcome;
}

/// The parser for a language, or [`CoreError::UnsupportedLanguage`].
pub fn parser_for(language: DescriptorLanguage) -> Result<Box<dyn DescriptorParser>, CoreError> {
    match language {
        DescriptorLanguage::Cwl => Ok(Box::new(cwl::CwlParser)),
        DescriptorLanguage::Wdl => Ok(Box::new(wdl::WdlParser)),
        DescriptorLanguage::Nextflow => Ok(Box::new(nextflow::NextflowParser)),
        DescriptorLanguage::Galaxy | DescriptorLanguage::Snakemake => {
            Err(CoreError::UnsupportedLanguage(language.to_string()))
        }
    }
}

/// Strip one layer of matching quotes.
pub(crate) fn unquote(s: &str) -> &str {
    let s = s.trim();
    for q in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

pub(crate) fn is_quoted(s: &str) -> bool {
    let s = s.trim();
    s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
}

/// Value of `key = value` or `key: value` on a Groovy/WDL-ish line.
pub(crate) fn assigned_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(key)?.trim_start();
    let rest = rest.strip_prefix('=').or_else(|| rest.strip_prefix(':'))?;
    let value = unquote(rest.trim());
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Net `{`/`}` count of a line. Interpolation placeholders balance
/// themselves.
pub(crate) fn brace_delta(line: &str) -> i64 {
    let mut delta = 0i64;
    for c in line.chars() {
        match c {
            '{' => delta += 1,
            '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Lines of a `{ ... }` block opened on `lines[start]`, excluding the
/// opening line. Stops at the matching close brace or end of input.
pub(crate) fn brace_block<'a>(lines: &[&'a str], start: usize) -> Vec<&'a str> {
    let mut depth = brace_delta(lines[start]);
    let mut out = Vec::new();
    if depth <= 0 {
        return out;
    }
    for line in &lines[start + 1..] {
        depth += brace_delta(line);
        if depth <= 0 {
            break;
        }
        out.push(*line);
    }
    out
}

/// Whether `text` mentions `name` followed by `sep` as a standalone token,
/// e.g. `align/` in `source: align/bam` but not in `realign/bam`.
pub(crate) fn references(text: &str, name: &str, sep: char) -> bool {
    let needle = format!("{name}{sep}");
    let mut from = 0;
    while let Some(pos) = text[from..].find(&needle) {
        let at = from + pos;
        let boundary = !matches!(
            text[..at].chars().next_back(),
            Some(c) if c.is_alphanumeric() || c == '_' || c == '-'
        );
        if boundary {
            return true;
        }
        from = at + needle.len();
    }
    false
}

pub(crate) fn sorted_unique(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items.dedup();
    items
}

/// File name without directory or extension.
pub(crate) fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_languages_are_fatal() {
        assert!(parser_for(DescriptorLanguage::Cwl).is_ok());
        assert!(parser_for(DescriptorLanguage::Nextflow).is_ok());
        assert!(matches!(
            parser_for(DescriptorLanguage::Galaxy),
            Err(CoreError::UnsupportedLanguage(l)) if l == "galaxy"
        ));
    }

    #[test]
    fn assigned_value_accepts_both_separators() {
        assert_eq!(assigned_value("author = 'Jane'", "author"), Some("Jane"));
        assert_eq!(assigned_value("  author: \"Jane\"", "author"), Some("Jane"));
        assert_eq!(assigned_value("authors = 'x'", "author"), None);
    }

    #[test]
    fn brace_block_stops_at_matching_close() {
        let lines = vec!["task a {", "  runtime {", "    docker: \"x\"", "  }", "}", "tail"];
        assert_eq!(brace_block(&lines, 0), ["  runtime {", "    docker: \"x\"", "  }"]);
        assert!(brace_block(&lines, 5).is_empty());
    }

    #[test]
    fn references_requires_token_boundary() {
        assert!(references("source: align/bam", "align", '/'));
        assert!(references("[align/bam, sort/out]", "sort", '/'));
        assert!(!references("source: realign/bam", "align", '/'));
        assert!(references("input: bam = align.out", "align", '.'));
    }

    #[test]
    fn file_stem_strips_dirs_and_extensions() {
        assert_eq!(file_stem("/tools/bwa-mem.cwl"), "bwa-mem");
        assert_eq!(file_stem("main.nf"), "main");
    }
}
