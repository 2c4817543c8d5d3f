// src/error.rs

//! Error types for imgsift
//!
//! A single crate-wide error enum. Variants map onto the failure taxonomy of
//! the pipeline: read failures, files that never settle, store failures,
//! conversion failures and post-success deletion failures are all reported
//! distinctly so the worker pool can count and log them separately.
//!
//! A fingerprint that is already present is *not* an error; see
//! [`crate::db::InsertOutcome`].

use std::path::PathBuf;
use thiserror::Error;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Source file could not be opened or read (locked, permissions, I/O)
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File never stabilized within the readiness attempt ceiling
    #[error("File '{path}' not ready after {attempts} checks")]
    NotReady { path: PathBuf, attempts: u32 },

    /// SQLite failure (connectivity, locking, constraint other than uniqueness)
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// No pooled connection became free within the acquire timeout
    #[error("Timed out after {waited_ms}ms waiting for a store connection")]
    PoolTimeout { waited_ms: u64 },

    /// Content could not be converted to the target format
    #[error("Failed to convert '{path}': {reason}")]
    Conversion { path: PathBuf, reason: String },

    /// Removing a source file failed after its outcome was already durable
    #[error("Failed to delete '{path}': {source}")]
    Deletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Component failed to start
    #[error("Initialization failed: {0}")]
    InitError(String),

    /// Record lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Record exists with incompatible contents
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Pipeline state machine was driven along an edge it does not have
    #[error("Invalid pipeline transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl Error {
    /// Whether retrying the same store operation may succeed
    ///
    /// Busy/locked databases, SQLite I/O failures, and pool exhaustion are
    /// transient. Everything else (schema errors, check constraints, bad
    /// input) fails the same way every time.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::PoolTimeout { .. } => true,
            Error::Store(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
                    | rusqlite::ErrorCode::CannotOpen
            ),
            _ => false,
        }
    }

    /// Short label used for stats and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Read { .. } => "read",
            Error::NotReady { .. } => "not_ready",
            Error::Store(_) | Error::PoolTimeout { .. } => "store",
            Error::Conversion { .. } => "conversion",
            Error::Deletion { .. } => "deletion",
            Error::Io(_) => "io",
            Error::Config(_) => "config",
            Error::InitError(_) => "init",
            Error::NotFound(_) => "not_found",
            Error::Conflict(_) => "conflict",
            Error::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
