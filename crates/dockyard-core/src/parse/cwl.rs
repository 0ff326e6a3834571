//! CWL documents, in YAML or JSON form.

use super::{file_stem, references, sorted_unique, DescriptorParser, ImportRef, ParseOutcome, Step};
use crate::imports::{resolve_import, FileSet};
use dockyard_schema::{DescriptorLanguage, VersionMetadata};
use serde_yaml::Value;
use tracing::debug;

pub struct CwlParser;

const DOCKER_REQUIREMENT: &str = "DockerRequirement";
const AUTHOR_KEYS: [&str; 3] = ["s:author", "s:creator", "dct:creator"];

fn load(content: &str) -> Result<Value, serde_yaml::Error> {
    serde_yaml::from_str(content)
}

fn string_at<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    node.get(key)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}

/// `(id, body)` of every step, from either the map form (`align: {...}`)
/// or the list form (`- id: align`). Leading `#` is dropped from ids.
fn steps_of(process: &Value) -> Vec<(String, &Value)> {
    let mut out = Vec::new();
    match process.get("steps") {
        Some(Value::Mapping(map)) => {
            for (key, body) in map {
                if let Some(id) = key.as_str() {
                    out.push((id.to_owned(), body));
                }
            }
        }
        Some(Value::Sequence(list)) => {
            for body in list {
                if let Some(id) = string_at(body, "id") {
                    out.push((id.to_owned(), body));
                }
            }
        }
        _ => {}
    }
    out.into_iter()
        .map(|(id, body)| (id.trim_start_matches('#').to_owned(), body))
        .filter(|(id, _)| !id.is_empty())
        .collect()
}

/// A `run:` naming another document. Inline processes and `#fragment`
/// references into the same file are not imports.
fn run_target(step: &Value) -> Option<&str> {
    string_at(step, "run").filter(|r| !r.starts_with('#'))
}

/// Entries of a `requirements`/`hints` section as `(class, body)`, from
/// either the map form keyed by class or the list form with `class:`.
fn requirement_entries<'a>(section: &'a Value) -> Vec<(&'a str, &'a Value)> {
    match section {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(class, body)| Some((class.as_str()?, body)))
            .collect(),
        Value::Sequence(list) => list
            .iter()
            .filter_map(|body| Some((string_at(body, "class")?, body)))
            .collect(),
        _ => Vec::new(),
    }
}

/// `dockerPull` of a process's own DockerRequirement. Requirements win
/// over hints.
fn own_docker_pull(process: &Value) -> Option<&str> {
    ["requirements", "hints"].into_iter().find_map(|key| {
        requirement_entries(process.get(key)?)
            .into_iter()
            .filter(|(class, _)| *class == DOCKER_REQUIREMENT)
            .find_map(|(_, body)| string_at(body, "dockerPull"))
    })
}

/// Every `dockerPull` anywhere in a document, in document order.
fn all_docker_pulls<'a>(node: &'a Value, out: &mut Vec<&'a str>) {
    match node {
        Value::Mapping(map) => {
            for (key, value) in map {
                if key.as_str() == Some("dockerPull") {
                    if let Some(image) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                        out.push(image);
                    }
                    continue;
                }
                all_docker_pulls(value, out);
            }
        }
        Value::Sequence(list) => list.iter().for_each(|v| all_docker_pulls(v, out)),
        Value::Tagged(tagged) => all_docker_pulls(&tagged.value, out),
        _ => {}
    }
}

fn first_docker_pull(process: &Value) -> Option<&str> {
    own_docker_pull(process).or_else(|| {
        let mut found = Vec::new();
        all_docker_pulls(process, &mut found);
        found.into_iter().next()
    })
}

/// `$import` and `$include` directives anywhere in a document.
fn directives<'a>(node: &'a Value, out: &mut Vec<&'a str>) {
    match node {
        Value::Mapping(map) => {
            for (key, value) in map {
                if matches!(key.as_str(), Some("$import" | "$include")) {
                    if let Some(target) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) {
                        out.push(target);
                    }
                    continue;
                }
                directives(value, out);
            }
        }
        Value::Sequence(list) => list.iter().for_each(|v| directives(v, out)),
        Value::Tagged(tagged) => directives(&tagged.value, out),
        _ => {}
    }
}

/// `run:` targets of every step, descending into inline sub-workflows.
fn run_targets<'a>(process: &'a Value, out: &mut Vec<&'a str>) {
    for (_, step) in steps_of(process) {
        match step.get("run") {
            Some(inline @ Value::Mapping(_)) => run_targets(inline, out),
            _ => out.extend(run_target(step)),
        }
    }
}

/// Every string scalar under `node`, joined by newlines.
fn scalars(node: &Value) -> String {
    fn collect(node: &Value, out: &mut Vec<String>) {
        match node {
            Value::String(s) => out.push(s.clone()),
            Value::Mapping(map) => {
                for (key, value) in map {
                    if let Some(k) = key.as_str() {
                        out.push(k.to_owned());
                    }
                    collect(value, out);
                }
            }
            Value::Sequence(list) => list.iter().for_each(|v| collect(v, out)),
            Value::Tagged(tagged) => collect(&tagged.value, out),
            _ => {}
        }
    }
    let mut out = Vec::new();
    collect(node, &mut out);
    out.join("\n")
}

fn strip_mailto(s: &str) -> String {
    s.strip_prefix("mailto:").unwrap_or(s).to_owned()
}

/// `doc` may be a string or, from CWL v1.1 on, a list of lines.
fn description(doc: &Value) -> Option<String> {
    let text = match doc.get("doc") {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Sequence(lines)) => lines
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_owned(),
        _ => String::new(),
    };
    if text.is_empty() {
        string_at(doc, "label").map(str::to_owned)
    } else {
        Some(text)
    }
}

fn metadata(doc: &Value) -> VersionMetadata {
    let mut meta = VersionMetadata {
        description: description(doc),
        ..VersionMetadata::default()
    };
    let Some(author) = AUTHOR_KEYS.into_iter().find_map(|k| doc.get(k)) else {
        return meta;
    };
    let person = match author {
        Value::Sequence(list) => list.first(),
        other => Some(other),
    };
    match person {
        Some(Value::String(name)) => meta.author = Some(name.trim().to_owned()),
        Some(person) => {
            meta.author = ["s:name", "foaf:name"]
                .into_iter()
                .find_map(|k| string_at(person, k))
                .map(str::to_owned);
            meta.email = ["s:email", "foaf:mbox"]
                .into_iter()
                .find_map(|k| string_at(person, k))
                .map(strip_mailto);
        }
        None => {}
    }
    meta
}

/// Top-level class, or the class of the first process of a packed
/// `$graph` document.
fn class_of(doc: &Value) -> Option<&str> {
    string_at(doc, "class").or_else(|| {
        doc.get("$graph")?
            .as_sequence()?
            .iter()
            .find_map(|p| string_at(p, "class"))
    })
}

fn steps(files: &FileSet, primary_abs: &str, doc: &Value) -> Vec<Step> {
    let blocks = steps_of(doc);
    let ids: Vec<&str> = blocks.iter().map(|(id, _)| id.as_str()).collect();
    blocks
        .iter()
        .map(|(id, body)| {
            let run = run_target(body);
            let file = run.map_or_else(|| primary_abs.to_owned(), |r| resolve_import(primary_abs, r));
            let tool_image = run
                .and_then(|_| files.get(&file))
                .and_then(|f| load(&f.content).ok())
                .and_then(|tool| first_docker_pull(&tool).map(str::to_owned));
            let inline_image = match body.get("run") {
                Some(inline @ Value::Mapping(_)) => own_docker_pull(inline),
                _ => None,
            };
            let image = tool_image
                .or_else(|| inline_image.or_else(|| own_docker_pull(body)).map(str::to_owned));
            let wiring = body.get("in").map(scalars).unwrap_or_default();
            Step {
                id: id.clone(),
                image,
                depends_on: ids
                    .iter()
                    .filter(|other| **other != id.as_str() && references(&wiring, other, '/'))
                    .map(|s| (*s).to_owned())
                    .collect(),
                file,
            }
        })
        .collect()
}

impl DescriptorParser for CwlParser {
    fn language(&self) -> DescriptorLanguage {
        DescriptorLanguage::Cwl
    }

    fn imports(&self, path: &str, content: &str) -> Vec<ImportRef> {
        let doc = match load(content) {
            Ok(doc) => doc,
            Err(e) => {
                debug!("{path} is not valid YAML, no imports followed: {e}");
                return Vec::new();
            }
        };
        let mut targets = Vec::new();
        run_targets(&doc, &mut targets);
        if let Some(graph) = doc.get("$graph").and_then(Value::as_sequence) {
            graph.iter().for_each(|p| run_targets(p, &mut targets));
        }
        directives(&doc, &mut targets);
        targets.into_iter().map(ImportRef::new).collect()
    }

    fn parse(&self, files: &FileSet) -> ParseOutcome {
        let Some(primary) = files.primary() else {
            return ParseOutcome::invalid("primary descriptor was not fetched", files);
        };
        let doc = match load(&primary.content) {
            Ok(doc @ Value::Mapping(_)) => doc,
            Ok(_) => return ParseOutcome::invalid("descriptor is not a mapping", files),
            Err(e) => return ParseOutcome::invalid(format!("invalid YAML: {e}"), files),
        };

        let class = class_of(&doc);
        let error = if string_at(&doc, "cwlVersion").is_none() {
            Some("missing cwlVersion".to_owned())
        } else if class.is_none() {
            Some("missing class".to_owned())
        } else {
            None
        };

        let mut steps = steps(files, &primary.absolute_path, &doc);
        if steps.is_empty() && class == Some("CommandLineTool") {
            steps.push(Step {
                id: file_stem(&primary.absolute_path).to_owned(),
                file: primary.absolute_path.clone(),
                image: first_docker_pull(&doc).map(str::to_owned),
                depends_on: Vec::new(),
            });
        }

        let mut declared = Vec::new();
        for file in files.descriptors() {
            match load(&file.content) {
                Ok(parsed) => {
                    let mut found = Vec::new();
                    all_docker_pulls(&parsed, &mut found);
                    declared.extend(found.into_iter().map(str::to_owned));
                }
                Err(e) => debug!("skipping images of {}: {e}", file.absolute_path),
            }
        }

        ParseOutcome {
            valid: error.is_none(),
            error,
            declared_images: sorted_unique(declared),
            metadata: metadata(&doc),
            parsed_info: files.parsed_info(),
            steps,
        }
    }
}
