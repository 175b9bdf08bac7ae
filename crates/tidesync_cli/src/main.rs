//! TideSync CLI
//!
//! Inspection and maintenance for a device's sync store.
//!
//! # Commands
//!
//! - `inspect` - Counts of pending changes, tombstones, deferred entries and groups
//! - `dump-changes` - List changes awaiting upload
//! - `dump-groups` - List group cursors
//! - `dump-tombstones` - List tombstoned record ids
//! - `dump-deferred` - List deferred inbound changes
//! - `compact` - Rewrite the journal

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use commands::CliResult;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TideSync store tools.
#[derive(Parser)]
#[command(name = "tidesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the sync store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// How command output is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store counts and journal size
    Inspect,

    /// List changes awaiting upload, oldest first
    DumpChanges {
        /// Maximum number of changes to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List group cursors, least recently polled first
    DumpGroups,

    /// List tombstoned record ids
    DumpTombstones,

    /// List deferred inbound changes
    DumpDeferred,

    /// Rewrite the journal to its live state
    Compact {
        /// Show what would be written without writing
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = || cli.path.clone().ok_or("store path required (--path)");
    let output = match cli.command {
        Commands::Inspect => commands::inspect::run(&path()?, cli.format)?,
        Commands::DumpChanges { limit } => commands::dump::changes(&path()?, limit, cli.format)?,
        Commands::DumpGroups => commands::dump::groups(&path()?, cli.format)?,
        Commands::DumpTombstones => commands::dump::tombstones(&path()?, cli.format)?,
        Commands::DumpDeferred => commands::dump::deferred(&path()?, cli.format)?,
        Commands::Compact { dry_run } => commands::compact::run(&path()?, dry_run, cli.format)?,
        Commands::Version => format!(
            "TideSync CLI v{}\nJournal format v{}",
            env!("CARGO_PKG_VERSION"),
            tidesync_core::journal::JOURNAL_VERSION
        ),
    };
    println!("{output}");

    Ok(())
}
