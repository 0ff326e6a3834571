use super::{
    assigned_value, brace_block, brace_delta, file_stem, is_quoted, references, sorted_unique,
    unquote, DescriptorParser, ImportRef, ParseOutcome, Step,
};
use crate::imports::{FileSet, ResolvedFile};
use dockyard_schema::{DescriptorLanguage, VersionMetadata};

pub struct NextflowParser;

const DEFAULT_MAIN_SCRIPT: &str = "main.nf";

fn first_quoted(s: &str) -> Option<&str> {
    let start = s.find(['\'', '"'])?;
    let quote = s[start..].chars().next()?;
    let inner = &s[start + 1..];
    inner.find(quote).map(|end| &inner[..end])
}

fn is_config(path: &str) -> bool {
    path.ends_with(".config")
}

fn is_script(path: &str) -> bool {
    path.ends_with(".nf")
}

/// `include { ALIGN } from './modules/align'` -> `./modules/align.nf`.
fn include_target(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if !trimmed.starts_with("include") {
        return None;
    }
    let (_, from) = trimmed.split_once(" from ")?;
    let target = first_quoted(from)?;
    if target.starts_with("plugin/") {
        return None;
    }
    let name = target.rsplit('/').next().unwrap_or(target);
    Some(if name.contains('.') {
        target.to_owned()
    } else {
        format!("{target}.nf")
    })
}

fn include_config_target(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("includeConfig")?;
    first_quoted(rest)
}

/// `container 'img'`, `container = "img"` or `container params.image`.
/// Unquoted expressions become `${...}` placeholders.
fn container_value(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let trimmed = trimmed.strip_prefix("process.").unwrap_or(trimmed);
    let rest = trimmed.strip_prefix("container")?;
    if !rest.starts_with([' ', '\t', '=']) {
        return None;
    }
    let rest = rest.trim_start();
    let value = rest.strip_prefix('=').unwrap_or(rest).trim();
    if value.is_empty() {
        None
    } else if is_quoted(value) {
        Some(unquote(value).to_owned())
    } else {
        Some(format!("${{{value}}}"))
    }
}

fn declared_process(line: &str) -> Option<&str> {
    let rest = line.trim().strip_prefix("process")?;
    if !rest.starts_with(char::is_whitespace) || !rest.contains('{') {
        return None;
    }
    let name = rest.trim().trim_end_matches('{').trim();
    (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')).then_some(name)
}

fn opens_workflow(line: &str) -> bool {
    line.trim()
        .strip_prefix("workflow")
        .is_some_and(|rest| rest.trim_end().ends_with('{') && !rest.starts_with(['.', '_']))
}

struct Process {
    name: String,
    file: String,
    image: Option<String>,
}

fn script_processes(file: &ResolvedFile) -> Vec<Process> {
    let lines: Vec<&str> = file.content.lines().collect();
    lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let name = declared_process(line)?;
            Some(Process {
                name: name.to_owned(),
                file: file.absolute_path.clone(),
                image: brace_block(&lines, i).iter().find_map(|l| container_value(l)),
            })
        })
        .collect()
}

fn config_images(file: &ResolvedFile) -> Vec<String> {
    file.content.lines().filter_map(container_value).collect()
}

fn metadata<'a>(configs: impl Iterator<Item = &'a ResolvedFile>) -> VersionMetadata {
    let mut lines: Vec<&str> = Vec::new();
    for config in configs {
        let all: Vec<&str> = config.content.lines().collect();
        for (i, line) in all.iter().enumerate() {
            if line.trim().strip_prefix("manifest").is_some_and(|r| r.trim() == "{") {
                lines.extend(brace_block(&all, i));
            } else if let Some(rest) = line.trim().strip_prefix("manifest.") {
                lines.push(rest);
            }
        }
    }
    let field = |key: &str| {
        lines
            .iter()
            .find_map(|l| assigned_value(l, key))
            .map(str::to_owned)
    };
    VersionMetadata {
        author: field("author"),
        email: None,
        description: field("description"),
    }
}

/// Upstream processes of `name`, read from `NAME(UPSTREAM.out, ...)` calls
/// in workflow blocks.
fn upstream(name: &str, all: &[String], workflow_lines: &[&str]) -> Vec<String> {
    let call = format!("{name}(");
    let mut out = Vec::new();
    for line in workflow_lines {
        let Some(pos) = line.find(&call) else {
            continue;
        };
        let args = &line[pos + call.len()..];
        for other in all {
            if other != name && references(args, other, '.') && !out.contains(other) {
                out.push(other.clone());
            }
        }
    }
    out.sort();
    out
}

impl DescriptorParser for NextflowParser {
    fn language(&self) -> DescriptorLanguage {
        DescriptorLanguage::Nextflow
    }

    fn imports(&self, path: &str, content: &str) -> Vec<ImportRef> {
        let mut out = Vec::new();
        let mut main_script = None;
        for line in content.lines() {
            if line.trim_start().starts_with("//") {
                continue;
            }
            if let Some(target) = include_config_target(line) {
                out.push(ImportRef::new(target));
            } else if let Some(target) = include_target(line) {
                out.push(ImportRef::new(target));
            } else if is_config(path) {
                let trimmed = line.trim();
                let trimmed = trimmed.strip_prefix("manifest.").unwrap_or(trimmed);
                if let Some(script) = assigned_value(trimmed, "mainScript") {
                    main_script = Some(script.to_owned());
                }
            }
        }
        let default_main = path.rsplit('/').next() == Some("nextflow.config");
        match main_script {
            Some(script) => out.push(ImportRef::new(script)),
            None if default_main => out.push(ImportRef::new(DEFAULT_MAIN_SCRIPT)),
            None => {}
        }
        out
    }

    fn parse(&self, files: &FileSet) -> ParseOutcome {
        let Some(primary) = files.primary() else {
            return ParseOutcome::invalid("primary descriptor was not fetched", files);
        };
        let scripts: Vec<&ResolvedFile> = files
            .descriptors()
            .filter(|f| is_script(&f.absolute_path))
            .collect();
        let configs = || files.descriptors().filter(|f| is_config(&f.absolute_path));

        let mut processes: Vec<Process> = scripts.iter().flat_map(|f| script_processes(f)).collect();
        let default_image = configs().flat_map(config_images).next();
        for p in &mut processes {
            if p.image.is_none() {
                p.image.clone_from(&default_image);
            }
        }

        let mut workflow_lines: Vec<&str> = Vec::new();
        for script in &scripts {
            let lines: Vec<&str> = script.content.lines().collect();
            for (i, line) in lines.iter().enumerate() {
                if opens_workflow(line) {
                    workflow_lines.extend(brace_block(&lines, i));
                }
            }
        }

        let error = if scripts.is_empty() {
            Some("main script was not fetched".to_owned())
        } else if scripts
            .iter()
            .any(|s| s.content.lines().map(brace_delta).sum::<i64>() != 0)
        {
            Some("unbalanced braces".to_owned())
        } else if processes.is_empty() && workflow_lines.is_empty() {
            Some("no process or workflow declared".to_owned())
        } else {
            None
        };

        let mut images: Vec<String> = processes.iter().filter_map(|p| p.image.clone()).collect();
        images.extend(configs().flat_map(config_images));

        let names: Vec<String> = processes.iter().map(|p| p.name.clone()).collect();
        let mut steps: Vec<Step> = processes
            .iter()
            .map(|p| Step {
                id: p.name.clone(),
                file: p.file.clone(),
                image: p.image.clone(),
                depends_on: upstream(&p.name, &names, &workflow_lines),
            })
            .collect();
        if steps.is_empty() && error.is_none() {
            steps.push(Step {
                id: file_stem(&primary.absolute_path).to_owned(),
                file: primary.absolute_path.clone(),
                image: default_image,
                depends_on: Vec::new(),
            });
        }

        ParseOutcome {
            valid: error.is_none(),
            error,
            declared_images: sorted_unique(images),
            metadata: metadata(std::iter::once(primary).chain(configs())),
            parsed_info: files.parsed_info(),
            steps,
        }
    }
}
