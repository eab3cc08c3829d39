//! Error types for the persistence layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`Store`](super::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to create the directory holding the database.
    #[error("Failed to create database directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open or create the database file.
    #[error("Failed to open database '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// A schema migration failed.
    #[error("Migration to schema version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: rusqlite::Error,
    },

    /// The database was written by a newer release.
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    /// Any other SQLite failure.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A list column could not be encoded.
    #[error("Failed to encode column value: {0}")]
    Encode(#[from] serde_json::Error),

    /// A stored value could not be decoded.
    #[error("Corrupt value in {table}.{column}: '{value}'")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        value: String,
    },

    /// A row expected by an update no longer exists.
    #[error("{what} with id {id} does not exist")]
    RowNotFound { what: &'static str, id: i64 },

    /// A check run references a pull request that is not stored.
    #[error("Pull request #{number} is not stored for repository {repository_id}")]
    MissingPullRequest { repository_id: i64, number: u64 },

    /// The blocking database task panicked or was cancelled.
    #[error("Database task failed: {0}")]
    Task(String),
}
