use super::{
    assigned_value, brace_block, brace_delta, is_quoted, references, sorted_unique, unquote,
    DescriptorParser, ImportRef, ParseOutcome, Step,
};
use crate::imports::FileSet;
use dockyard_schema::{DescriptorLanguage, VersionMetadata};

pub struct WdlParser;

/// `import "lib/tasks.wdl" as tasks` -> `lib/tasks.wdl`.
fn import_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("import")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(&inner[..end])
}

/// Name of a `keyword name {` declaration.
fn declared_name<'a>(line: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(keyword)?;
    if !rest.starts_with(char::is_whitespace) || !rest.contains('{') {
        return None;
    }
    let name = rest.trim().trim_end_matches('{').trim();
    (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')).then_some(name)
}

fn opens_section(line: &str, section: &str) -> bool {
    line.trim()
        .strip_prefix(section)
        .is_some_and(|rest| rest.trim() == "{")
}

/// `docker: "ubuntu:22.04"` keeps the literal; `docker: image` is an input
/// and becomes the `~{image}` placeholder.
fn runtime_image(line: &str) -> Option<String> {
    for key in ["docker", "container"] {
        let Some(rest) = line.trim().strip_prefix(key) else {
            continue;
        };
        let Some(value) = rest.trim_start().strip_prefix(':') else {
            continue;
        };
        let value = value.trim().trim_end_matches(',').trim();
        if value.is_empty() {
            continue;
        }
        return Some(if is_quoted(value) {
            unquote(value).to_owned()
        } else {
            format!("~{{{value}}}")
        });
    }
    None
}

fn runtime_images(lines: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if opens_section(line, "runtime") || opens_section(line, "requirements") {
            out.extend(brace_block(lines, i).iter().filter_map(|l| runtime_image(l)));
        }
    }
    out
}

struct Task {
    name: String,
    file: String,
    image: Option<String>,
}

fn tasks(files: &FileSet) -> Vec<Task> {
    let mut out = Vec::new();
    for file in files.descriptors() {
        let lines: Vec<&str> = file.content.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if let Some(name) = declared_name(line, "task") {
                out.push(Task {
                    name: name.to_owned(),
                    file: file.absolute_path.clone(),
                    image: runtime_images(&brace_block(&lines, i)).into_iter().next(),
                });
            }
        }
    }
    out
}

fn metadata(lines: &[&str]) -> VersionMetadata {
    let mut blocks: Vec<Vec<&str>> = Vec::new();
    if let Some(wf) = lines.iter().position(|l| declared_name(l, "workflow").is_some()) {
        let body = brace_block(lines, wf);
        if let Some(m) = body.iter().position(|l| opens_section(l, "meta")) {
            blocks.push(brace_block(&body, m));
        }
    }
    for (i, line) in lines.iter().enumerate() {
        if opens_section(line, "meta") {
            blocks.push(brace_block(lines, i));
        }
    }

    let field = |key: &str| {
        blocks
            .iter()
            .flatten()
            .find_map(|l| assigned_value(l, key))
            .map(str::to_owned)
    };
    VersionMetadata {
        author: field("author"),
        email: field("email"),
        description: field("description"),
    }
}

/// `call lib.align as first_pass {` -> (`lib.align`, `first_pass`).
fn call_header(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim().strip_prefix("call")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let header = rest.split('{').next().unwrap_or(rest);
    let mut tokens = header.split_whitespace();
    let target = tokens.next()?;
    let id = match (tokens.next(), tokens.next()) {
        (Some("as"), Some(alias)) => alias,
        _ => target.rsplit('.').next().unwrap_or(target),
    };
    Some((target, id))
}

fn steps(files: &FileSet, primary_abs: &str, lines: &[&str], tasks: &[Task]) -> Vec<Step> {
    let Some(wf) = lines.iter().position(|l| declared_name(l, "workflow").is_some()) else {
        return tasks
            .iter()
            .filter(|t| t.file == primary_abs)
            .map(|t| Step {
                id: t.name.clone(),
                file: t.file.clone(),
                image: t.image.clone(),
                depends_on: Vec::new(),
            })
            .collect();
    };
    let body = brace_block(lines, wf);

    let mut calls = Vec::new();
    for (j, line) in body.iter().enumerate() {
        let Some((target, id)) = call_header(line) else {
            continue;
        };
        let task_name = target.rsplit('.').next().unwrap_or(target);
        let namespaced = target.contains('.');
        let task = tasks
            .iter()
            .filter(|t| t.name == task_name)
            .find(|t| namespaced != (t.file == primary_abs))
            .or_else(|| tasks.iter().find(|t| t.name == task_name));

        let mut wiring = line.split_once('{').map_or("", |(_, r)| r).to_owned();
        for inner in brace_block(&body, j) {
            wiring.push('\n');
            wiring.push_str(inner);
        }
        calls.push((id.to_owned(), task, wiring));
    }

    let ids: Vec<String> = calls.iter().map(|(id, _, _)| id.clone()).collect();
    calls
        .into_iter()
        .map(|(id, task, wiring)| Step {
            depends_on: ids
                .iter()
                .filter(|other| **other != id && references(&wiring, other, '.'))
                .cloned()
                .collect(),
            file: task.map_or_else(|| files.primary_path().to_owned(), |t| t.file.clone()),
            image: task.and_then(|t| t.image.clone()),
            id,
        })
        .collect()
}

impl DescriptorParser for WdlParser {
    fn language(&self) -> DescriptorLanguage {
        DescriptorLanguage::Wdl
    }

    fn imports(&self, _path: &str, content: &str) -> Vec<ImportRef> {
        content
            .lines()
            .filter_map(import_target)
            .map(ImportRef::new)
            .collect()
    }

    fn parse(&self, files: &FileSet) -> ParseOutcome {
        let Some(primary) = files.primary() else {
            return ParseOutcome::invalid("primary descriptor was not fetched", files);
        };
        let lines: Vec<&str> = primary.content.lines().collect();

        let declares = lines
            .iter()
            .any(|l| declared_name(l, "workflow").is_some() || declared_name(l, "task").is_some());
        let balance: i64 = lines.iter().map(|l| brace_delta(l)).sum();
        let error = if !declares {
            Some("no workflow or task declared".to_owned())
        } else if balance != 0 {
            Some("unbalanced braces".to_owned())
        } else {
            None
        };

        let tasks = tasks(files);
        let declared_images = sorted_unique(
            files
                .descriptors()
                .flat_map(|f| {
                    let lines: Vec<&str> = f.content.lines().collect();
                    runtime_images(&lines)
                })
                .collect(),
        );

        ParseOutcome {
            valid: error.is_none(),
            error,
            declared_images,
            metadata: metadata(&lines),
            parsed_info: files.parsed_info(),
            steps: steps(files, &primary.absolute_path, &lines, &tasks),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::ResolvedFile;
    use dockyard_schema::FileType;

    const MAIN: &str = r#"version 1.0

import "lib/tasks.wdl" as lib

workflow align_and_count {
  meta {
    author: "Jane Doe"
    email: "jane@example.org"
    description: "Align reads, then count them."
  }
  input {
    File reads
    String count_image = "ubuntu:22.04"
  }
  call lib.align as first_pass { input: reads = reads }
  call count { input: bam = first_pass.bam, image = count_image }
}

task count {
  input {
    File bam
    String image
  }
  command <<<
    samtools view -c ~{bam}
  >>>
  runtime {
    docker: image
  }
}
"#;

    const LIB: &str = r#"version 1.0
task align {
  command { bwa mem ${reads} }
  runtime {
    docker: "quay.io/bio/bwa:0.7.17"
    memory: "4G"
  }
}
"#;

    fn set() -> FileSet {
        let mut set = FileSet::new("main.wdl");
        for (abs, file_type, content) in [
            ("/main.wdl", FileType::PrimaryDescriptor, MAIN),
            ("/lib/tasks.wdl", FileType::ImportedDescriptor, LIB),
        ] {
            set.insert(ResolvedFile {
                path: abs.trim_start_matches('/').to_owned(),
                absolute_path: abs.to_owned(),
                file_type,
                content: content.to_owned(),
            });
        }
        set
    }

    #[test]
    fn imports_are_quoted_paths() {
        let imports = WdlParser.imports("/main.wdl", MAIN);
        assert_eq!(imports, [ImportRef::new("lib/tasks.wdl")]);
        assert!(WdlParser.imports("/x.wdl", "important = 1\n").is_empty());
    }

    #[test]
    fn parse_extracts_images_metadata_and_calls() {
        let outcome = WdlParser.parse(&set());
        assert!(outcome.valid, "{:?}", outcome.error);
        assert_eq!(outcome.declared_images, ["quay.io/bio/bwa:0.7.17", "~{image}"]);
        assert_eq!(outcome.metadata.author.as_deref(), Some("Jane Doe"));
        assert_eq!(outcome.metadata.email.as_deref(), Some("jane@example.org"));
        assert_eq!(
            outcome.metadata.description.as_deref(),
            Some("Align reads, then count them.")
        );

        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].id, "first_pass");
        assert_eq!(outcome.steps[0].file, "/lib/tasks.wdl");
        assert_eq!(outcome.steps[0].image.as_deref(), Some("quay.io/bio/bwa:0.7.17"));
        assert_eq!(outcome.steps[1].id, "count");
        assert_eq!(outcome.steps[1].file, "/main.wdl");
        assert_eq!(outcome.steps[1].depends_on, ["first_pass"]);
    }

    #[test]
    fn task_only_file_lists_tasks_as_steps() {
        let mut set = FileSet::new("lib/tasks.wdl");
        set.insert(ResolvedFile {
            path: "lib/tasks.wdl".to_owned(),
            absolute_path: "/lib/tasks.wdl".to_owned(),
            file_type: FileType::PrimaryDescriptor,
            content: LIB.to_owned(),
        });
        let outcome = WdlParser.parse(&set);
        assert!(outcome.valid);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].id, "align");
    }

    #[test]
    fn unbalanced_braces_are_invalid() {
        let mut set = FileSet::new("main.wdl");
        set.insert(ResolvedFile {
            path: "main.wdl".to_owned(),
            absolute_path: "/main.wdl".to_owned(),
            file_type: FileType::PrimaryDescriptor,
            content: "version 1.0\nworkflow w {\n  meta {\n    author: \"A\"\n  }\n".to_owned(),
        });
        let outcome = WdlParser.parse(&set);
        assert!(!outcome.valid);
        assert_eq!(outcome.error.as_deref(), Some("unbalanced braces"));
        assert_eq!(outcome.metadata.author.as_deref(), Some("A"));
    }
}
