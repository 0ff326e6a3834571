use super::{describe, json_pretty, EXIT_SUCCESS};
use dockyard_core::{Engine, RegisterRequest};
use dockyard_schema::{DescriptorLanguage, EntryKind, Provider, SourceLocator};

pub struct Args<'a> {
    pub path: &'a str,
    pub provider: &'a str,
    pub language: &'a str,
    pub descriptor: &'a str,
    pub test_parameter: Option<&'a str>,
    pub checker: bool,
    pub tool: Option<&'a str>,
}

/// Parse `registry/namespace/name`.
fn tool_kind(spec: &str) -> Result<EntryKind, String> {
    match spec.split('/').collect::<Vec<_>>().as_slice() {
        [registry, namespace, name]
            if !registry.is_empty() && !namespace.is_empty() && !name.is_empty() =>
        {
            Ok(EntryKind::Tool {
                registry: (*registry).to_owned(),
                namespace: (*namespace).to_owned(),
                name: (*name).to_owned(),
            })
        }
        _ => Err(format!(
            "invalid tool '{spec}': expected registry/namespace/name"
        )),
    }
}

fn request(args: &Args<'_>) -> Result<RegisterRequest, String> {
    let provider: Provider = args.provider.parse().map_err(|e| format!("{e}"))?;
    let language: DescriptorLanguage = args.language.parse().map_err(|e| format!("{e}"))?;
    let source = SourceLocator::parse(provider, args.path).map_err(|e| format!("{e}"))?;
    let kind = match args.tool {
        Some(spec) => tool_kind(spec)?,
        None => EntryKind::Workflow {
            is_checker: args.checker,
        },
    };
    Ok(RegisterRequest {
        source,
        language,
        primary_descriptor: args.descriptor.to_owned(),
        test_parameter: args.test_parameter.map(str::to_owned),
        kind,
    })
}

pub fn run(engine: &Engine, args: &Args<'_>, json: bool) -> Result<u8, String> {
    let entry = engine.register_entry(request(args)?).map_err(describe)?;
    if json {
        println!("{}", json_pretty(&entry)?);
    } else {
        println!("registered {} ({})", entry.path, entry.kind.label());
        println!("entry_id: {}", entry.id);
    }
    Ok(EXIT_SUCCESS)
}
