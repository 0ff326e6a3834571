use super::{describe, json_pretty, EXIT_SUCCESS};
use dockyard_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let entries = engine.list_entries().map_err(describe)?;
    if json {
        println!("{}", json_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("no entries registered");
    } else {
        println!("{:<10} {:<10} {:<40} ENTRY_ID", "KIND", "LANGUAGE", "PATH");
        for entry in &entries {
            println!(
                "{:<10} {:<10} {:<40} {}",
                entry.kind.label(),
                entry.language,
                entry.path,
                entry.id
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
