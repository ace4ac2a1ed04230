//! Tidepool CLI - drive a store module through the arena protocol.

mod commands;
mod observability;

use anyhow::Result;
use clap::{Parser, Subcommand};
use observability::{TracingConfig, init_tracing};
use std::path::PathBuf;

/// Tidepool - host binding for arena-marshalled store modules.
#[derive(Parser)]
#[command(name = "tidepool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// YAML file overriding export and import names
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List a module's exports and resolved size descriptors
    Inspect {
        /// Path to the module
        module: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert JSON into a result tuple and aggregate it over a date range
    Convert {
        /// Path to the module
        module: PathBuf,

        /// JSON text, or @path to read it from a file
        input: String,

        /// First date of the aggregation range
        #[arg(long, default_value_t = 0)]
        start: u32,

        /// Last date of the aggregation range
        #[arg(long, default_value_t = u32::MAX)]
        end: u32,
    },

    /// Load, update and dump a store
    Snapshot {
        /// Path to the module
        module: PathBuf,

        /// Base64 snapshot to initialize from (empty store if omitted)
        #[arg(short, long)]
        snapshot: Option<String>,

        /// Primary records to upsert (JSON text or @path)
        #[arg(long)]
        primary: Option<String>,

        /// Secondary records to upsert (JSON text or @path)
        #[arg(long)]
        secondary: Option<String>,

        /// Print the persisted snapshot as base64 instead of the JSON view
        #[arg(long)]
        persist: bool,
    },

    /// Run an id query against a store
    Query {
        /// Path to the module
        module: PathBuf,

        /// Base64 snapshot to initialize from (empty store if omitted)
        #[arg(short, long)]
        snapshot: Option<String>,

        /// Ids to match
        #[arg(long, value_delimiter = ',')]
        ids: Vec<u32>,

        /// Match tag ids instead of record ids
        #[arg(long)]
        by_tag: bool,

        /// Drop matches instead of keeping them
        #[arg(long)]
        exclude: bool,

        /// Date range filter as MIN:MAX
        #[arg(long)]
        date: Option<String>,
    },

    /// Show version information
    Version,
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_tracing(&TracingConfig::from_env(filter))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Inspect { module, json } => commands::inspect::run(&module, config, json),
        Commands::Convert {
            module,
            input,
            start,
            end,
        } => commands::convert::run(&module, config, &input, start, end),
        Commands::Snapshot {
            module,
            snapshot,
            primary,
            secondary,
            persist,
        } => commands::snapshot::run(
            &module,
            config,
            commands::snapshot::SnapshotOptions {
                snapshot: snapshot.as_deref(),
                primary: primary.as_deref(),
                secondary: secondary.as_deref(),
                persist,
            },
        ),
        Commands::Query {
            module,
            snapshot,
            ids,
            by_tag,
            exclude,
            date,
        } => commands::query::run(
            &module,
            config,
            snapshot.as_deref(),
            commands::query::QueryOptions {
                ids,
                by_tag,
                exclude,
                date: date.as_deref(),
            },
        ),
        Commands::Version => commands::version::run(),
    }
}
