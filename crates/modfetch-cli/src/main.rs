#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::struct_excessive_bools)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use modfetch_core::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "modfetch")]
#[command(author, version, about = "Resolve and install modules from a NuGet-v3 style registry", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON output and JSON logs
    #[arg(long, global = true)]
    json: bool,

    /// Read settings from a JSON config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Registry service index URL
    #[arg(long, global = true, value_name = "URL")]
    source: Option<String>,

    /// Directory modules are installed into
    #[arg(long, global = true, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// Extra directory to search for installed modules (repeatable)
    #[arg(long = "path", global = true, value_name = "DIR")]
    paths: Vec<PathBuf>,

    /// Prefer the newest registry version over satisfying local installs
    #[arg(long, global = true)]
    update: bool,

    /// Allow prerelease versions for every requirement
    #[arg(long, global = true)]
    prerelease: bool,

    /// Compare ranges with literal SemVer2 rules
    #[arg(long, global = true)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Resolve requirements and print the installation plan
    Plan {
        /// Requirements, e.g. `Az.Accounts`, `Pester>=5.0`, `PSReadLine@2.3.4`
        #[arg(required = true, value_name = "SPEC")]
        specs: Vec<String>,

        /// Write the resolved plan to this lockfile
        #[arg(long, value_name = "FILE")]
        lockfile: Option<PathBuf>,
    },

    /// Resolve requirements and install them
    Install {
        /// Requirements, e.g. `Az.Accounts`, `Pester>=5.0`, `PSReadLine@2.3.4`
        #[arg(value_name = "SPEC", required_unless_present = "lockfile")]
        specs: Vec<String>,

        /// Install exactly the versions pinned in this lockfile
        #[arg(long, value_name = "FILE", conflicts_with = "specs")]
        lockfile: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        return commands::version::run();
    }

    let config = build_config(&cli)?;
    logging::init(config.verbosity, config.json_logs);

    match &cli.command {
        Commands::Version => Ok(()),
        Commands::Plan { specs, lockfile } => {
            commands::plan::run(&config, specs, lockfile.as_deref(), cli.json)
        }
        Commands::Install { specs, lockfile } => {
            commands::install::run(&config, specs, lockfile.as_deref(), cli.json)
        }
    }
}

/// Config file, then environment, then flags.
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    }
    .apply_env()
    .with_verbosity(cli.verbose)
    .with_json_logs(cli.json);

    if let Some(source) = &cli.source {
        config = config.with_source(source.clone());
    }
    if let Some(destination) = &cli.destination {
        config = config.with_destination(destination.clone());
    }
    for path in &cli.paths {
        config = config.with_search_path(path.clone());
    }
    if cli.update {
        config = config.with_update(true);
    }
    if cli.prerelease {
        config = config.with_prerelease(true);
    }
    if cli.strict {
        config = config.with_strict(true);
    }

    config.validate().into_diagnostic()?;
    Ok(config)
}
