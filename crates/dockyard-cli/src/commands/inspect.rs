use super::{describe, json_pretty, resolve_entry, EXIT_SUCCESS};
use dockyard_core::Engine;
use dockyard_schema::{Entry, Version};

fn print_entry(entry: &Entry) {
    println!("entry_id:     {}", entry.id);
    println!("path:         {}", entry.path);
    println!("kind:         {}", entry.kind.label());
    println!("language:     {}", entry.language);
    println!("descriptor:   {}", entry.primary_descriptor);
    println!(
        "test_param:   {}",
        entry.test_parameter.as_deref().unwrap_or("(none)")
    );
    println!("created_at:   {}", entry.created_at);
    println!("updated_at:   {}", entry.updated_at);
}

fn print_version(version: &Version) {
    println!("version_id:   {}", version.id);
    println!("reference:    {} ({})", version.reference, version.reference_kind);
    println!("state:        {}", version.state());
    println!("valid:        {}", version.valid);
    println!("revision:     {}", version.revision);
    println!(
        "author:       {}",
        version.metadata.author.as_deref().unwrap_or("(none)")
    );
    println!(
        "synced_at:    {}",
        version.synced_at.as_deref().unwrap_or("(never)")
    );
    println!("files:");
    for file in &version.files {
        println!("  {:<40} {:?}", file.absolute_path, file.file_type);
    }
    println!("images:");
    for image in &version.images {
        println!("  {:<40} {} digest(s)", image.spec, image.digests.len());
    }
    if !version.diagnostics.is_clean() {
        println!("diagnostics:");
        if let Some(reason) = &version.diagnostics.parse_error {
            println!("  invalid: {reason}");
        }
        for missing in &version.diagnostics.missing_files {
            println!("  missing file: {missing}");
        }
        for failure in &version.diagnostics.image_failures {
            println!("  image {}: {}", failure.spec, failure.reason);
        }
    }
}

pub fn run(engine: &Engine, entry: &str, reference: Option<&str>, json: bool) -> Result<u8, String> {
    let entry = resolve_entry(engine, entry)?;
    match reference {
        None if json => println!("{}", json_pretty(&entry)?),
        None => print_entry(&entry),
        Some(reference) => {
            let version = engine.get_version(&entry.id, reference).map_err(describe)?;
            if json {
                println!("{}", json_pretty(&version)?);
            } else {
                print_version(&version);
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
