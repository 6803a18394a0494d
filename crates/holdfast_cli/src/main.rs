//! Holdfast CLI
//!
//! Command-line tools for Holdfast local state directories.
//!
//! # Commands
//!
//! - `inspect` - Display an entity's snapshot and sync metadata
//! - `queue` - List pending writes in sync order
//! - `verify` - Check queue ordering and the replay invariant
//! - `repair` - Rebuild a damaged pending-write queue
//! - `mutate` - Record a mutation offline for the next sync
//! - `emergency` - Show or clear an entity's emergency backup

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Holdfast local state tools.
#[derive(Parser)]
#[command(name = "holdfast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the local state directory
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
    /// Display an entity's snapshot and sync metadata
    Inspect {
        /// Entity to inspect; lists all entities when omitted
        entity: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending writes in sync order
    Queue {
        /// Entity whose queue to list
        entity: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify queue ordering and that replay reproduces the snapshot
    Verify {
        /// Entity to verify; verifies every entity when omitted
        entity: Option<String>,
    },

    /// Rebuild a damaged pending-write queue
    Repair {
        /// Entity to repair
        entity: String,

        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Record a mutation offline; it is synced on the next pass
    Mutate {
        /// Entity to mutate
        entity: String,

        /// Mutation kind tag (e.g. UPDATE_HEALTH)
        kind: String,

        /// Payload as JSON
        payload: String,
    },

    /// Show or clear an entity's emergency backup
    Emergency {
        /// Entity whose backup to show
        entity: String,

        /// Delete the backup
        #[arg(short, long)]
        clear: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

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
        Commands::Inspect { entity, format } => {
            let path = cli.path.ok_or("State path required for inspect")?;
            commands::inspect::run(&path, entity.as_deref(), &format)?;
        }
        Commands::Queue { entity, format } => {
            let path = cli.path.ok_or("State path required for queue")?;
            commands::queue::run(&path, &entity, &format)?;
        }
        Commands::Verify { entity } => {
            let path = cli.path.ok_or("State path required for verify")?;
            commands::verify::run(&path, entity.as_deref())?;
        }
        Commands::Repair { entity, dry_run } => {
            let path = cli.path.ok_or("State path required for repair")?;
            commands::repair::run(&path, &entity, dry_run)?;
        }
        Commands::Mutate {
            entity,
            kind,
            payload,
        } => {
            let path = cli.path.ok_or("State path required for mutate")?;
            commands::mutate::run(&path, &entity, &kind, &payload)?;
        }
        Commands::Emergency {
            entity,
            clear,
            format,
        } => {
            let path = cli.path.ok_or("State path required for emergency")?;
            commands::emergency::run(&path, &entity, clear, &format)?;
        }
        Commands::Version => {
            println!("Holdfast CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Record schema v{}", holdfast_protocol::SCHEMA_VERSION);
        }
    }

    Ok(())
}
