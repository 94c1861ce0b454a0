//! RingJournal CLI
//!
//! Command-line tools for ringjournal files.
//!
//! # Commands
//!
//! - `create` - Create an empty journal file
//! - `inspect` - Display header fields and a ring summary
//! - `dump` - Print the entries replay would return
//! - `verify` - Scan the ring and report where the valid log ends

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// RingJournal command-line maintenance tools.
#[derive(Parser)]
#[command(name = "ringjournal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the journal file
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
    /// Create an empty journal
    Create {
        /// Total file size in bytes, header block included
        #[arg(short, long)]
        capacity: u64,

        /// Identity token (a random one is generated if omitted)
        #[arg(short, long)]
        identity: Option<String>,

        /// Write with direct I/O alignment
        #[arg(short, long)]
        directio: bool,

        /// Header block and direct I/O alignment in bytes
        #[arg(short, long, default_value = "4096")]
        block_size: usize,
    },

    /// Display header fields and a ring summary
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the entries replay would return
    Dump {
        /// Skip entries at or below this sequence
        #[arg(short, long, default_value = "0")]
        after: u64,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Scan the ring and report where the valid log ends
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Create {
            capacity,
            identity,
            directio,
            block_size,
        } => {
            let path = cli.path.ok_or("Journal path required for create")?;
            commands::create::run(&path, capacity, identity.as_deref(), directio, block_size)?;
        }
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            after,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Journal path required for dump")?;
            commands::dump::run(&path, after, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Journal path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("RingJournal CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("RingJournal Core v{}", ringjournal_core::VERSION);
        }
    }

    Ok(())
}
