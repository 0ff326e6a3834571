use super::{describe, json_pretty, resolve_entry, EXIT_SUCCESS};
use dockyard_core::{CancelToken, Engine, SyncReport};

pub(crate) fn print_report(report: &SyncReport) {
    let v = &report.version;
    if report.unchanged {
        println!("{} is frozen, left unchanged", v.reference);
        return;
    }
    println!(
        "synced {} ({}): {} file(s), {} image(s), revision {}",
        v.reference,
        if v.valid { "valid" } else { "invalid" },
        v.files.len(),
        v.images.len(),
        v.revision
    );
    if let Some(reason) = &v.diagnostics.parse_error {
        println!("  invalid: {reason}");
    }
    for missing in &report.missing_files {
        println!("  missing file: {missing}");
    }
    for failure in &report.image_failures {
        println!("  image {}: {}", failure.spec, failure.reason);
    }
}

pub fn run(
    engine: &Engine,
    entry: &str,
    reference: &str,
    force_full: bool,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    let report = engine
        .synchronize(&entry.id, reference, force_full, cancel)
        .map_err(describe)?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(EXIT_SUCCESS)
}
