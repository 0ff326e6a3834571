use super::{describe, json_pretty, resolve_entry, EXIT_SUCCESS};
use dockyard_core::Engine;

pub fn run(engine: &Engine, entry: &str, reference: &str, json: bool) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    let graph = engine.get_graph(&entry.id, reference).map_err(describe)?;
    if json {
        println!("{}", json_pretty(&graph)?);
    } else {
        for node in &graph.nodes {
            println!(
                "{:<20} {:<32} {}",
                node.id,
                node.file,
                node.image.as_deref().unwrap_or("-")
            );
        }
        for edge in &graph.edges {
            println!("{} -> {}", edge.from, edge.to);
        }
    }
    Ok(EXIT_SUCCESS)
}
