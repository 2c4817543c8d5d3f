// src/db/mod.rs

//! Record Store
//!
//! Durable mapping from content fingerprint to processing record, backed by
//! SQLite. All access goes through a bounded [`ConnectionPool`]; every
//! operation is wrapped in a [`RetryPolicy`] that retries transient failures
//! (busy or locked database, pool exhaustion) with exponential backoff.

pub mod models;
pub mod pool;
pub mod schema;

use crate::error::{Error, Result};
use crate::hash::Hash;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub use models::{FileMetadata, FileRecord, InsertOutcome, StoreStats};
pub use pool::{ConnectionPool, PooledConnection};

/// Create the database file (and parent directories) and apply migrations
pub fn init(db_path: &Path) -> Result<()> {
    info!("[store] Initializing database at {}", db_path.display());

    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut conn = pool::open_connection(db_path)?;
    schema::migrate(&mut conn)?;
    Ok(())
}

/// Backoff schedule for store operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// Run `op`, retrying transient errors
    pub fn run<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_if(what, Error::is_transient, op)
    }

    /// Run `op`, retrying every error `retryable` accepts
    pub fn run_if<T, F, P>(&self, what: &str, retryable: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: Fn(&Error) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "[store] {} failed (attempt {}/{}): {}; retrying in {:?}",
                        what, attempt, max_attempts, e, delay
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pooled, retrying access to the record table
#[derive(Clone)]
pub struct RecordStore {
    pool: ConnectionPool,
    retry: RetryPolicy,
}

impl RecordStore {
    /// Open the store, creating and migrating the database as needed
    ///
    /// Startup is retried under `retry` for any store or I/O failure so a
    /// database on a slow mount gets a chance to appear.
    pub fn connect(
        db_path: &Path,
        pool_size: usize,
        acquire_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let startup_retryable =
            |e: &Error| matches!(e, Error::Store(_) | Error::Io(_) | Error::PoolTimeout { .. });

        let pool = retry
            .run_if("connect", startup_retryable, || {
                init(db_path)?;
                ConnectionPool::open(db_path, pool_size, acquire_timeout)
            })
            .map_err(|e| Error::InitError(format!("store unreachable: {}", e)))?;

        debug!(
            "[store] Connected to {} with {} connections",
            db_path.display(),
            pool.size()
        );

        Ok(Self { pool, retry })
    }

    /// Claim a fingerprint; see [`FileRecord::insert_if_absent`]
    pub fn insert_if_absent(&self, fingerprint: &Hash, meta: &FileMetadata) -> Result<InsertOutcome> {
        self.retry.run("insert_if_absent", || {
            let conn = self.pool.acquire()?;
            FileRecord::insert_if_absent(&conn, fingerprint, meta)
        })
    }

    /// Complete a reserved fingerprint; see [`FileRecord::mark_processed`]
    pub fn mark_processed(&self, fingerprint: &str, target_path: &Path) -> Result<()> {
        self.retry.run("mark_processed", || {
            let conn = self.pool.acquire()?;
            FileRecord::mark_processed(&conn, fingerprint, target_path)
        })
    }

    pub fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<FileRecord>> {
        self.retry.run("find_by_fingerprint", || {
            let conn = self.pool.acquire()?;
            FileRecord::find_by_fingerprint(&conn, fingerprint)
        })
    }

    /// Total number of records
    pub fn total_records(&self) -> Result<u64> {
        self.retry.run("total_records", || {
            let conn = self.pool.acquire()?;
            FileRecord::count(&conn)
        })
    }

    pub fn statistics(&self) -> Result<StoreStats> {
        self.retry.run("statistics", || {
            let conn = self.pool.acquire()?;
            FileRecord::stats(&conn)
        })
    }

    /// Reservations that never completed
    pub fn list_pending(&self, limit: usize) -> Result<Vec<FileRecord>> {
        self.retry.run("list_pending", || {
            let conn = self.pool.acquire()?;
            FileRecord::list_pending(&conn, limit)
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
