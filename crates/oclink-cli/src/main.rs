//! oclink CLI - Kernel source preprocessing, status lookup and device info.
//!
//! # Commands
//!
//! - `oclink preprocess <name>` - Expand includes and `%NAME%` constants
//! - `oclink status <code>` - Explain a device status code
//! - `oclink info` - Show the selected device and available backends
//!
//! # Examples
//!
//! ```bash
//! # Print blur.cl with its includes expanded and WIDTH set
//! oclink preprocess blur --root shaders --define WIDTH=1920
//!
//! # What does -54 mean?
//! oclink status -54
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{info, preprocess, status};
use error::{CliError, CliResult};
use oclink::config::OclinkConfig;

/// oclink CLI - host/device variable sync tooling
#[derive(Parser)]
#[command(name = "oclink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand includes and constants in a kernel source
    Preprocess {
        /// Kernel name, without extension
        name: String,

        /// Kernel source root (default: from configuration)
        #[arg(short, long)]
        root: Option<String>,

        /// Constant substitution NAME=VALUE (repeatable)
        #[arg(short = 'D', long = "define")]
        defines: Vec<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Explain a device status code
    Status {
        /// Numeric status code
        #[arg(allow_negative_numbers = true)]
        code: i32,
    },

    /// Show device information
    Info {
        /// Backend to use (auto, cpu, opencl)
        #[arg(short, long)]
        backend: Option<String>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> CliResult<OclinkConfig> {
    OclinkConfig::load_optional(path).map_err(|e| CliError::Oclink(e.into()))
}

fn run(cli: Cli) -> CliResult<()> {
    match cli.command {
        Commands::Preprocess {
            name,
            root,
            defines,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            preprocess::execute(&config, &name, root.as_deref(), &defines, output.as_deref())
        }

        Commands::Status { code } => status::execute(code),

        Commands::Info { backend } => {
            let config = load_config(cli.config.as_deref())?;
            info::execute(config, backend.as_deref())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
