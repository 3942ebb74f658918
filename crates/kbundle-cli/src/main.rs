//! kbundle CLI - OLM bundle descriptors from operator manifests

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;
mod display;
mod error;
mod exit_codes;

use commands::generate::GenerateArgs;

#[derive(Parser)]
#[command(name = "kbundle")]
#[command(author = "kbundle Contributors")]
#[command(version)]
#[command(about = "Generate OLM bundle descriptors from operator manifests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a ClusterServiceVersion (and optionally the whole bundle)
    Generate(GenerateArgs),

    /// Validate an existing ClusterServiceVersion
    Validate {
        /// Descriptor file
        file: PathBuf,

        /// Strict mode - treat warnings as errors
        #[arg(long)]
        strict: bool,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "kbundle=debug" } else { "kbundle=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let result = match cli.command {
        Commands::Generate(args) => commands::generate::run(&args),
        Commands::Validate { file, strict } => commands::validate::run(&file, strict),
    };

    if let Err(err) = result {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
