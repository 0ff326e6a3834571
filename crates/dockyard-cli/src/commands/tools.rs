use super::{describe, json_pretty, resolve_entry, EXIT_SUCCESS};
use dockyard_core::Engine;

pub fn run(engine: &Engine, entry: &str, reference: &str, json: bool) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    let table = engine.get_tool_table(&entry.id, reference).map_err(describe)?;
    if json {
        println!("{}", json_pretty(&table)?);
    } else if table.rows.is_empty() {
        println!("no tools found");
    } else {
        println!("{:<20} {:<32} {:<40} DIGESTS", "ID", "FILE", "IMAGE");
        for row in &table.rows {
            println!(
                "{:<20} {:<32} {:<40} {}",
                row.id,
                row.file,
                row.image.as_deref().unwrap_or("-"),
                row.digests.join(" ")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
