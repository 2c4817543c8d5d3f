// src/db/schema.rs

//! Database schema definitions and migrations for imgsift
//!
//! The schema is versioned through a `schema_version` table. Migrations are
//! applied in order inside a single immediate transaction so that two
//! processes starting against the same database do not both run them.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let current_version = get_schema_version(&tx)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        debug!("Schema is up to date");
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(&tx, version)?;
        set_schema_version(&tx, version)?;
    }

    tx.commit()?;
    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::InitError(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Initial schema - Version 1
///
/// One row per distinct content. The unique index on `fingerprint` is the
/// deduplication gate; the check constraint ties `processed_at` to
/// `target_path` so a half-finished conversion can never look complete.
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE file_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT NOT NULL,
            original_name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            extension TEXT NOT NULL,
            source_path TEXT NOT NULL,
            target_path TEXT,
            discovered_at TEXT NOT NULL,
            processed_at TEXT,
            hash_algorithm TEXT NOT NULL DEFAULT 'sha256',
            CHECK ((target_path IS NULL) = (processed_at IS NULL))
        );

        CREATE UNIQUE INDEX uq_file_records_fingerprint ON file_records(fingerprint);
        CREATE INDEX idx_file_records_extension ON file_records(extension);
        CREATE INDEX idx_file_records_processed_at ON file_records(processed_at);
        CREATE INDEX idx_file_records_size_bytes ON file_records(size_bytes);
        ",
    )?;

    Ok(())
}
