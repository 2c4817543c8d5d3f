// src/db/models/file_record.rs

//! Processed-file records
//!
//! One row per distinct content fingerprint. A row is created the moment a
//! worker claims a fingerprint and completed (target path plus timestamp)
//! once the converted output is on disk.

use crate::error::{Error, Result};
use crate::hash::{Hash, HashAlgorithm};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

const SELECT_COLUMNS: &str = "SELECT id, fingerprint, original_name, size_bytes, extension, source_path,
        target_path, discovered_at, processed_at, hash_algorithm
 FROM file_records";

/// A stored fingerprint record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: i64,
    /// Lowercase hex digest of the file content
    pub fingerprint: String,
    /// File name of the first source seen with this content
    pub original_name: String,
    pub size_bytes: i64,
    /// Lowercased source extension, without the dot
    pub extension: String,
    pub source_path: String,
    /// Converted output; `None` until conversion completed
    pub target_path: Option<String>,
    /// RFC 3339 timestamp of the reservation
    pub discovered_at: String,
    /// RFC 3339 timestamp of completion; set together with `target_path`
    pub processed_at: Option<String>,
    pub hash_algorithm: String,
}

/// Metadata captured about a source file when its fingerprint is reserved
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub original_name: String,
    pub size_bytes: u64,
    pub extension: String,
    pub source_path: String,
    pub hash_algorithm: HashAlgorithm,
}

impl FileMetadata {
    /// Describe a source file from its path and observed size
    pub fn from_path(path: &Path, size_bytes: u64, hash_algorithm: HashAlgorithm) -> Self {
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            original_name,
            size_bytes,
            extension,
            source_path: path.to_string_lossy().into_owned(),
            hash_algorithm,
        }
    }
}

/// Result of trying to claim a fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// This caller created the record and owns its conversion
    Inserted(FileRecord),
    /// Another caller got there first; the existing record is returned
    AlreadyExists(FileRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &FileRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyExists(r) => r,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Aggregate counts over the record table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: u64,
    pub processed: u64,
    /// Reserved but never completed
    pub pending: u64,
    pub total_bytes: u64,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl FileRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            fingerprint: row.get(1)?,
            original_name: row.get(2)?,
            size_bytes: row.get(3)?,
            extension: row.get(4)?,
            source_path: row.get(5)?,
            target_path: row.get(6)?,
            discovered_at: row.get(7)?,
            processed_at: row.get(8)?,
            hash_algorithm: row.get(9)?,
        })
    }

    /// Whether the conversion for this content has completed
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Claim `fingerprint` by inserting a pending row
    ///
    /// Exactly one of any number of concurrent callers for the same
    /// fingerprint gets [`InsertOutcome::Inserted`]. The uniqueness
    /// constraint decides; there is no read-then-write window.
    pub fn insert_if_absent(
        conn: &Connection,
        fingerprint: &Hash,
        meta: &FileMetadata,
    ) -> Result<InsertOutcome> {
        let discovered_at = chrono::Utc::now().to_rfc3339();

        let inserted = conn.execute(
            "INSERT INTO file_records (fingerprint, original_name, size_bytes, extension,
                source_path, discovered_at, hash_algorithm)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                fingerprint.as_str(),
                &meta.original_name,
                meta.size_bytes as i64,
                &meta.extension,
                &meta.source_path,
                &discovered_at,
                meta.hash_algorithm.name(),
            ],
        );

        match inserted {
            Ok(_) => Ok(InsertOutcome::Inserted(Self {
                id: conn.last_insert_rowid(),
                fingerprint: fingerprint.as_str().to_string(),
                original_name: meta.original_name.clone(),
                size_bytes: meta.size_bytes as i64,
                extension: meta.extension.clone(),
                source_path: meta.source_path.clone(),
                target_path: None,
                discovered_at,
                processed_at: None,
                hash_algorithm: meta.hash_algorithm.name().to_string(),
            })),
            Err(e) if is_unique_violation(&e) => {
                let existing = Self::find_by_fingerprint(conn, fingerprint.as_str())?
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "record for {} vanished after uniqueness conflict",
                            fingerprint
                        ))
                    })?;
                Ok(InsertOutcome::AlreadyExists(existing))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record the converted output for a reserved fingerprint
    ///
    /// Repeating the call with the same target is a no-op. A different
    /// target for an already-completed record is a [`Error::Conflict`].
    pub fn mark_processed(conn: &Connection, fingerprint: &str, target_path: &Path) -> Result<()> {
        let target = target_path.to_string_lossy().into_owned();
        let processed_at = chrono::Utc::now().to_rfc3339();

        let updated = conn.execute(
            "UPDATE file_records SET target_path = ?2, processed_at = ?3
             WHERE fingerprint = ?1 AND target_path IS NULL",
            params![fingerprint, &target, &processed_at],
        )?;

        if updated == 1 {
            return Ok(());
        }

        match Self::find_by_fingerprint(conn, fingerprint)? {
            None => Err(Error::NotFound(format!("no record for fingerprint {}", fingerprint))),
            Some(existing) if existing.target_path.as_deref() == Some(target.as_str()) => Ok(()),
            Some(existing) => Err(Error::Conflict(format!(
                "fingerprint {} already processed to {}",
                fingerprint,
                existing.target_path.unwrap_or_default()
            ))),
        }
    }

    /// Find a record by its fingerprint
    pub fn find_by_fingerprint(conn: &Connection, fingerprint: &str) -> Result<Option<Self>> {
        let result = conn
            .query_row(
                &format!("{} WHERE fingerprint = ?1", SELECT_COLUMNS),
                [fingerprint],
                Self::from_row,
            )
            .optional()?;

        Ok(result)
    }

    /// Records reserved but never completed, oldest first
    pub fn list_pending(conn: &Connection, limit: usize) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE processed_at IS NULL ORDER BY id LIMIT ?1",
            SELECT_COLUMNS
        ))?;

        let rows = stmt
            .query_map([limit as i64], Self::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    /// Total number of records
    pub fn count(conn: &Connection) -> Result<u64> {
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Aggregate counts for reporting
    pub fn stats(conn: &Connection) -> Result<StoreStats> {
        let (total, processed, total_bytes): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(processed_at),
                    COALESCE(SUM(size_bytes), 0)
             FROM file_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            total: total as u64,
            processed: processed as u64,
            pending: (total - processed) as u64,
            total_bytes: total_bytes as u64,
        })
    }
}
