use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use dockyard_core::Engine;
use dockyard_store::verify_store_integrity;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = verify_store_integrity(engine.layout()).map_err(|e| format!("store error: {e}"))?;

    if json {
        let payload = serde_json::json!({
            "objects_checked": report.objects_checked,
            "objects_passed": report.objects_passed,
            "entries_checked": report.entries_checked,
            "entries_passed": report.entries_passed,
            "versions_checked": report.versions_checked,
            "versions_passed": report.versions_passed,
            "failed": report.failed.len(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: {}/{} objects, {}/{} entries, {}/{} versions passed",
            report.objects_passed,
            report.objects_checked,
            report.entries_passed,
            report.entries_checked,
            report.versions_passed,
            report.versions_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.id, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
