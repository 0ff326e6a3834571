use super::{describe, json_pretty, resolve_entry, sync::print_report, EXIT_FAILURE, EXIT_SUCCESS};
use dockyard_core::{CancelToken, Engine};

pub fn run(
    engine: &Engine,
    entry: &str,
    force_full: bool,
    cancel: &CancelToken,
    json: bool,
) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    let report = engine
        .refresh(&entry.id, force_full, cancel)
        .map_err(describe)?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        for synced in &report.synced {
            print_report(synced);
        }
        for failure in &report.failed {
            println!("failed {}: {}", failure.reference, failure.error);
        }
        for reference in &report.retained {
            println!("retained {reference} (no longer upstream)");
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
