#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;
use packline_core::Mode;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "packline")]
#[command(author, version, about = "Rule-driven build orchestrator with a hot-reloading dev server", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON (build summary on stdout, log lines on stderr)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Configuration file (default: packline.config.json in the working directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured mode (development | production)
    #[arg(long, global = true)]
    mode: Option<Mode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build once and write the output directory
    Build {
        /// Build without writing files
        #[arg(long)]
        dry_run: bool,
    },

    /// Build, watch and serve with hot updates
    Dev {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Disable the hot update channel
        #[arg(long)]
        no_hot: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let config = commands::load_config(&cwd, cli.config.as_deref(), cli.mode)?;

    match cli.command {
        Commands::Build { dry_run } => commands::build::run(config, dry_run, cli.json),
        Commands::Dev { host, port, no_hot } => {
            let action = commands::dev::DevAction { host, port, no_hot };
            let runtime = tokio::runtime::Runtime::new().map_err(|e| miette::miette!("{e}"))?;
            runtime.block_on(commands::dev::run(config, action))
        }
    }
}
