//! Replica CLI
//!
//! Command-line tools for Replica local databases.
//!
//! # Commands
//!
//! - `inspect` - Display tables, record counts and log size
//! - `queue` - List operations waiting to be synchronized
//! - `checkpoint` - Compact the record log into one snapshot
//! - `verify` - Check every frame of the record log

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Replica command-line database tools.
#[derive(Parser)]
#[command(name = "replica")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display tables, record counts and log size
    Inspect {
        /// Include internal tables
        #[arg(short, long)]
        internal: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List operations waiting to be synchronized
    Queue {
        /// Only show operations for this entity type
        #[arg(short = 't', long = "type")]
        entity_type: Option<String>,

        /// Maximum number of operations to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Compact the record log into one snapshot
    Checkpoint,

    /// Check every frame of the record log
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { internal, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, internal, &format)?;
        }
        Commands::Queue {
            entity_type,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for queue")?;
            commands::queue::run(&path, entity_type.as_deref(), limit, &format)?;
        }
        Commands::Checkpoint => {
            let path = cli.path.ok_or("Database path required for checkpoint")?;
            commands::checkpoint::run(&path)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("Replica CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Replica Core v{}", replica_core::VERSION);
        }
    }

    Ok(())
}
