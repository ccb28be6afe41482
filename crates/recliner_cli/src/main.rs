//! Recliner CLI
//!
//! Command-line access to a file-backed Recliner data directory.
//!
//! # Commands
//!
//! - `create-db`, `delete-db`, `list`, `info` - Database lifecycle
//! - `put`, `get`, `delete` - Single documents
//! - `find` - Run a selector query
//! - `changes` - Read the change feed
//! - `create-index` - Add a query index
//! - `replicate` - Replicate between two local databases

mod commands;

use clap::{Parser, Subcommand};
use commands::CliError;
use recliner_core::{Config, Recliner};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Recliner command-line tool.
#[derive(Parser)]
#[command(name = "recliner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the data directory
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
    /// Create a database
    CreateDb {
        /// Database name
        db: String,
    },

    /// Delete a database and everything in it
    DeleteDb {
        /// Database name
        db: String,
    },

    /// List databases
    List,

    /// Show database statistics
    Info {
        /// Database name
        db: String,
    },

    /// Create or update a document
    Put {
        /// Database name
        db: String,
        /// Document id
        id: String,
        /// Document body as JSON
        body: String,
        /// Current revision, required to update
        #[arg(short, long)]
        rev: Option<String>,
    },

    /// Read a document
    Get {
        /// Database name
        db: String,
        /// Document id
        id: String,
        /// Include the revision ancestry
        #[arg(long)]
        revs: bool,
    },

    /// Delete a document
    Delete {
        /// Database name
        db: String,
        /// Document id
        id: String,
        /// Current revision
        #[arg(short, long)]
        rev: Option<String>,
    },

    /// Find documents matching a selector
    Find {
        /// Database name
        db: String,
        /// Query as JSON: a selector, or `{"selector": .., "sort": .., ..}`
        query: String,
    },

    /// Read the change feed
    Changes {
        /// Database name
        db: String,
        /// Sequence to start after
        #[arg(short, long, default_value = "0")]
        since: String,
        /// Maximum number of changes
        #[arg(short, long)]
        limit: Option<usize>,
        /// Include current document bodies
        #[arg(long)]
        include_docs: bool,
    },

    /// Create a query index
    CreateIndex {
        /// Database name
        db: String,
        /// Indexed fields
        #[arg(required = true)]
        fields: Vec<String>,
        /// Design document holding the index
        #[arg(long)]
        ddoc: Option<String>,
        /// Index name
        #[arg(long)]
        name: Option<String>,
    },

    /// Replicate between two local databases
    Replicate {
        /// Source database name
        source: String,
        /// Target database name, created if needed
        target: String,
        /// Only replicate documents matching this JSON selector
        #[arg(long)]
        selector: Option<String>,
        /// Only replicate these document ids
        #[arg(long, value_delimiter = ',')]
        doc_ids: Vec<String>,
        /// Stop after this many documents
        #[arg(short, long)]
        limit: Option<usize>,
        /// Replicate design documents too
        #[arg(long)]
        design: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("Recliner CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("Recliner Core v{}", recliner_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or(CliError::Usage("--path is required".into()))?;
    let recliner = Recliner::open(&path, Config::default())?;

    let output = match cli.command {
        Commands::CreateDb { db } => commands::db::create(&recliner, &db)?,
        Commands::DeleteDb { db } => commands::db::delete(&recliner, &db)?,
        Commands::List => commands::db::list(&recliner),
        Commands::Info { db } => commands::db::info(&recliner, &db)?,
        Commands::Put { db, id, body, rev } => {
            commands::docs::put(&recliner, &db, &id, &body, rev.as_deref())?
        }
        Commands::Get { db, id, revs } => commands::docs::get(&recliner, &db, &id, revs)?,
        Commands::Delete { db, id, rev } => {
            commands::docs::delete(&recliner, &db, &id, rev.as_deref())?
        }
        Commands::Find { db, query } => commands::docs::find(&recliner, &db, &query)?,
        Commands::Changes {
            db,
            since,
            limit,
            include_docs,
        } => commands::docs::changes(&recliner, &db, &since, limit, include_docs)?,
        Commands::CreateIndex {
            db,
            fields,
            ddoc,
            name,
        } => commands::docs::create_index(
            &recliner,
            &db,
            &fields,
            ddoc.as_deref(),
            name.as_deref(),
        )?,
        Commands::Replicate {
            source,
            target,
            selector,
            doc_ids,
            limit,
            design,
        } => {
            let options = commands::replicate::Options {
                selector,
                doc_ids,
                limit,
                design,
            };
            commands::replicate::run(recliner, &source, &target, options)?
        }
        Commands::Version => return Ok(()),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
