use super::{describe, json_pretty, resolve_entry, EXIT_SUCCESS};
use dockyard_core::Engine;
use dockyard_schema::Version;
use serde::Serialize;

#[derive(Serialize)]
struct VersionSummary<'a> {
    reference: &'a str,
    kind: String,
    state: String,
    valid: bool,
    images: usize,
    revision: u64,
    synced_at: Option<&'a str>,
}

impl<'a> From<&'a Version> for VersionSummary<'a> {
    fn from(v: &'a Version) -> Self {
        Self {
            reference: &v.reference,
            kind: v.reference_kind.to_string(),
            state: v.state().to_string(),
            valid: v.valid,
            images: v.images.len(),
            revision: v.revision,
            synced_at: v.synced_at.as_deref(),
        }
    }
}

pub fn run(engine: &Engine, entry: &str, json: bool) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    let versions = engine.list_versions(&entry.id).map_err(describe)?;
    let summaries: Vec<VersionSummary<'_>> = versions.iter().map(VersionSummary::from).collect();
    if json {
        println!("{}", json_pretty(&summaries)?);
    } else if summaries.is_empty() {
        println!("no versions synchronized");
    } else {
        println!(
            "{:<24} {:<7} {:<8} {:<8} {:<7} REVISION",
            "REFERENCE", "KIND", "STATE", "VALID", "IMAGES"
        );
        for s in &summaries {
            println!(
                "{:<24} {:<7} {:<8} {:<8} {:<7} {}",
                s.reference, s.kind, s.state, s.valid, s.images, s.revision
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
