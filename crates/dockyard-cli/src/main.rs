mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_STORE_ERROR};
use dockyard_core::{install_signal_handler, CancelToken, DockyardConfig, Engine};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "dockyard",
    version,
    about = "Version synchronization and snapshot engine for a tool and workflow catalog"
)]
struct Cli {
    /// Configuration file (defaults to $DOCKYARD_CONFIG, then
    /// ~/.config/dockyard/dockyard.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory, overriding the configured one.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Register a workflow or tool, or update an existing registration.
    Register {
        /// Repository path: org/repo, or org/repo/name for several entries
        /// in one repository.
        path: String,
        /// Source-control provider (github, gitlab, bitbucket).
        #[arg(long, default_value = "github")]
        provider: String,
        /// Descriptor language (cwl, wdl, nextflow).
        #[arg(long)]
        language: String,
        /// Primary descriptor path inside the repository.
        #[arg(long)]
        descriptor: String,
        /// Test parameter file path inside the repository.
        #[arg(long)]
        test_parameter: Option<String>,
        /// Register a checker workflow.
        #[arg(long, default_value_t = false, conflicts_with = "tool")]
        checker: bool,
        /// Register a tool published as registry/namespace/name.
        #[arg(long)]
        tool: Option<String>,
    },
    /// Synchronize one reference of an entry.
    Sync {
        /// Entry ID or catalog path.
        entry: String,
        /// Branch or tag.
        reference: String,
        /// Re-resolve digest-pinned images too.
        #[arg(long, default_value_t = false)]
        force_full: bool,
    },
    /// Synchronize every upstream reference of an entry.
    Refresh {
        /// Entry ID or catalog path.
        entry: String,
        /// Re-resolve digest-pinned images too.
        #[arg(long, default_value_t = false)]
        force_full: bool,
    },
    /// Freeze a version into an immutable snapshot.
    Freeze {
        /// Entry ID or catalog path.
        entry: String,
        /// Branch or tag.
        reference: String,
    },
    /// Print the step dependency graph of a version.
    Graph {
        /// Entry ID or catalog path.
        entry: String,
        /// Branch or tag.
        reference: String,
    },
    /// Print the tool table of a version.
    Tools {
        /// Entry ID or catalog path.
        entry: String,
        /// Branch or tag.
        reference: String,
    },
    /// Show an entry, or one of its versions.
    Inspect {
        /// Entry ID or catalog path.
        entry: String,
        /// Branch or tag.
        reference: Option<String>,
    },
    /// List registered entries.
    List,
    /// List the stored versions of an entry.
    Versions {
        /// Entry ID or catalog path.
        entry: String,
    },
    /// Verify store integrity.
    VerifyStore,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DOCKYARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Completions { shell } = cli.command {
        return exit_code(commands::completions::run::<Cli>(shell));
    }

    let mut config = match DockyardConfig::discover(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Some(store) = cli.store {
        config.store_root = store;
    }
    let engine = match Engine::from_config(&config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_STORE_ERROR);
        }
    };

    let cancel = CancelToken::new();
    install_signal_handler(&cancel);
    let json = cli.json;

    let result = match cli.command {
        Commands::Register {
            path,
            provider,
            language,
            descriptor,
            test_parameter,
            checker,
            tool,
        } => commands::register::run(
            &engine,
            &commands::register::Args {
                path: &path,
                provider: &provider,
                language: &language,
                descriptor: &descriptor,
                test_parameter: test_parameter.as_deref(),
                checker,
                tool: tool.as_deref(),
            },
            json,
        ),
        Commands::Sync {
            entry,
            reference,
            force_full,
        } => commands::sync::run(&engine, &entry, &reference, force_full, &cancel, json),
        Commands::Refresh { entry, force_full } => {
            commands::refresh::run(&engine, &entry, force_full, &cancel, json)
        }
        Commands::Freeze { entry, reference } => {
            commands::freeze::run(&engine, &entry, &reference, json)
        }
        Commands::Graph { entry, reference } => {
            commands::graph::run(&engine, &entry, &reference, json)
        }
        Commands::Tools { entry, reference } => {
            commands::tools::run(&engine, &entry, &reference, json)
        }
        Commands::Inspect { entry, reference } => {
            commands::inspect::run(&engine, &entry, reference.as_deref(), json)
        }
        Commands::List => commands::list::run(&engine, json),
        Commands::Versions { entry } => commands::versions::run(&engine, &entry, json),
        Commands::VerifyStore => commands::verify_store::run(&engine, json),
        Commands::Completions { .. } => unreachable!("handled before the engine is opened"),
    };

    exit_code(result)
}

fn exit_code(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("config error:") {
                EXIT_CONFIG_ERROR
            } else if msg.starts_with("store error:")
                || msg.starts_with("transaction helper poisoned:")
            {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
