use super::{describe, json_pretty, resolve_entry, EXIT_FREEZE_ERROR, EXIT_SUCCESS};
use dockyard_core::{CoreError, Engine};

pub fn run(engine: &Engine, entry: &str, reference: &str, json: bool) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    match engine.freeze(&entry.id, reference) {
        Ok(version) => {
            if json {
                println!("{}", json_pretty(&version)?);
            } else {
                println!("frozen {}@{reference}", entry.path);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(CoreError::Freeze(e)) => {
            if json {
                let payload = serde_json::json!({
                    "reference": e.reference,
                    "offenders": e.offenders,
                    "error": e.to_string(),
                });
                println!("{}", json_pretty(&payload)?);
            }
            eprintln!("error: {e}");
            Ok(EXIT_FREEZE_ERROR)
        }
        Err(e) => Err(describe(e)),
    }
}
