#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use tz_core::{token_from_env, Config, DEFAULT_REGISTRY};

#[derive(Parser, Debug)]
#[command(name = "tz")]
#[command(author, version, about = "A package manager for AI-agent configuration bundles", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Registry base URL
    #[arg(long, global = true, value_name = "URL")]
    registry: Option<String>,

    /// Override the content store location
    #[arg(long, global = true, value_name = "PATH")]
    store_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Resolve, fetch, and link all declared dependencies
    Install {
        /// Never touch the network; use the lockfile and store only
        #[arg(long)]
        offline: bool,

        /// Fail if the resolution would change the lockfile
        #[arg(long)]
        frozen_lockfile: bool,

        /// Refetch archives even when the store already has them
        #[arg(long)]
        force: bool,
    },

    /// Update dependencies to the latest satisfying versions
    Update {
        /// Print the plan without touching disk
        #[arg(long)]
        dry_run: bool,
    },

    /// Add packages to the manifest and install them
    Add {
        /// Package specs (e.g., "@t/starter", "@t/starter@^1.0.0")
        #[arg(required = true)]
        specs: Vec<String>,
    },

    /// Remove packages from the manifest and the module tree
    Remove {
        /// Package names (e.g., "@t/starter")
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Validate the project manifest
    Validate,

    /// Inspect the content store
    Cache {
        #[command(subcommand)]
        cache_cmd: CacheCommands,
    },

    /// Print version information
    Version,
}

#[derive(clap::Subcommand, Debug)]
enum CacheCommands {
    /// List extracted store entries
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = cli
        .cwd
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = Config::new(cwd)
        .with_registry(cli.registry.as_deref().unwrap_or(DEFAULT_REGISTRY))
        .with_token(token_from_env())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);
    if let Some(store_root) = cli.store_root.clone() {
        config = config.with_store_root(store_root);
    }

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;

    match cli.command {
        Commands::Install {
            offline,
            frozen_lockfile,
            force,
        } => {
            let options = tz_core::InstallOptions {
                offline,
                frozen_lockfile,
                force,
            };
            runtime.block_on(commands::install::run(config, &options, cli.json, cli.verbose))
        }
        Commands::Update { dry_run } => {
            let options = tz_core::UpdateOptions { dry_run };
            runtime.block_on(commands::update::run(config, &options, cli.json, cli.verbose))
        }
        Commands::Add { specs } => {
            runtime.block_on(commands::add::run(config, &specs, cli.json, cli.verbose))
        }
        Commands::Remove { names } => {
            runtime.block_on(commands::remove::run(config, &names, cli.json, cli.verbose))
        }
        Commands::Validate => commands::validate::run(&config, cli.json, cli.verbose),
        Commands::Cache { cache_cmd } => match cache_cmd {
            CacheCommands::List => commands::cache::run_list(&config, cli.json, cli.verbose),
        },
        Commands::Version => commands::version::run(cli.json),
    }
}
