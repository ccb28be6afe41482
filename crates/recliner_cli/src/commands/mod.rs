//! CLI command implementations.
//!
//! Each command runs against an open instance and returns the JSON value
//! `main` prints.

pub mod db;
pub mod docs;
pub mod replicate;

use recliner_codec::CodecError;
use recliner_core::{CoreError, Database, Recliner};
use recliner_replication::ReplicationError;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Bad command-line input.
    #[error("{0}")]
    Usage(String),

    /// An argument was not valid JSON.
    #[error("invalid JSON argument: {0}")]
    Json(#[from] CodecError),

    /// The database rejected the operation.
    #[error(transparent)]
    Database(#[from] CoreError),

    /// Replication failed.
    #[error(transparent)]
    Replication(#[from] ReplicationError),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

fn open_db(recliner: &Recliner, name: &str) -> CliResult<Arc<Database>> {
    recliner
        .database(name)
        .ok_or_else(|| CliError::Usage(format!("no database named {name}")))
}
