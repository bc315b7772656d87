//! ebbsync CLI
//!
//! Command-line tools for the persisted state of an ebbsync client.
//!
//! # Commands
//!
//! - `status` - Show queue length and time since the last sync
//! - `queue` - List pending writes
//! - `verify` - Check the persisted queue for malformed entries
//! - `enqueue` - Append a write to the queue
//! - `clear-queue` - Discard every pending write

mod commands;

use clap::{Parser, Subcommand};
use ebbsync_engine::{DEFAULT_LAST_SYNC_KEY, DEFAULT_QUEUE_KEY};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ebbsync command-line tools.
#[derive(Parser)]
#[command(name = "ebbsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the client store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Storage key of the persisted queue
    #[arg(global = true, long, default_value = DEFAULT_QUEUE_KEY)]
    queue_key: String,

    /// Storage key of the last sync time
    #[arg(global = true, long, default_value = DEFAULT_LAST_SYNC_KEY)]
    last_sync_key: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue length and last sync time
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending writes in replay order
    Queue {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify the persisted queue
    Verify,

    /// Append a write to the queue
    Enqueue {
        /// Operation as JSON, e.g. {"type":"delete","table":"agents","filters":{"id":5}}
        #[arg(short, long)]
        op: String,

        /// Maximum queued items; the oldest is evicted beyond this
        #[arg(short, long, default_value = "100")]
        capacity: usize,
    },

    /// Discard every pending write
    ClearQueue,

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

    let keys = commands::Keys {
        queue: cli.queue_key,
        last_sync: cli.last_sync_key,
    };

    match cli.command {
        Commands::Status { format } => {
            let path = cli.path.ok_or("Store path required for status")?;
            commands::status::run(&path, &keys, &format)?;
        }
        Commands::Queue { format } => {
            let path = cli.path.ok_or("Store path required for queue")?;
            commands::queue::run(&path, &keys, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &keys)?;
        }
        Commands::Enqueue { op, capacity } => {
            let path = cli.path.ok_or("Store path required for enqueue")?;
            commands::enqueue::run(&path, &keys, &op, capacity)?;
        }
        Commands::ClearQueue => {
            let path = cli.path.ok_or("Store path required for clear-queue")?;
            commands::clear_queue::run(&path, &keys)?;
        }
        Commands::Version => {
            println!("ebbsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
