// src/stats.rs

//! Outcome counters
//!
//! Workers only ever increment; readers take a [`StatsSnapshot`]. All
//! counters are relaxed atomics, so a snapshot taken while workers run is a
//! consistent-enough view for reporting but not a transactional one.

use crate::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Stats {
    started: Instant,
    processed: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    read_errors: AtomicU64,
    not_ready_errors: AtomicU64,
    store_errors: AtomicU64,
    conversion_errors: AtomicU64,
    deletion_errors: AtomicU64,
    interrupted: AtomicU64,
    total_records: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub runtime: Duration,
    pub processed: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub read_errors: u64,
    pub not_ready_errors: u64,
    pub store_errors: u64,
    pub conversion_errors: u64,
    /// Source removals that failed after a durable outcome; not in `errors`
    pub deletion_errors: u64,
    pub interrupted: u64,
    /// Last observed record-store total
    pub total_records: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            not_ready_errors: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            conversion_errors: AtomicU64::new(0),
            deletion_errors: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
            total_records: AtomicU64::new(0),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a terminal failure under its kind
    pub fn record_error(&self, err: &Error) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let bucket = match err {
            Error::Read { .. } => &self.read_errors,
            Error::NotReady { .. } => &self.not_ready_errors,
            Error::Store(_) | Error::PoolTimeout { .. } => &self.store_errors,
            Error::Conversion { .. } => &self.conversion_errors,
            _ => return,
        };
        bucket.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletion_failure(&self) {
        self.deletion_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the latest record count read from the store
    pub fn set_total_records(&self, total: u64) {
        self.total_records.store(total, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            runtime: self.started.elapsed(),
            processed: self.processed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            not_ready_errors: self.not_ready_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            conversion_errors: self.conversion_errors.load(Ordering::Relaxed),
            deletion_errors: self.deletion_errors.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            total_records: self.total_records.load(Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "runtime {}s, processed {}, duplicates {}, errors {}, total records {}",
            self.runtime.as_secs(),
            self.processed,
            self.duplicates,
            self.errors,
            self.total_records
        )?;
        if self.errors > 0 {
            write!(
                f,
                " (read {}, not ready {}, store {}, conversion {})",
                self.read_errors, self.not_ready_errors, self.store_errors, self.conversion_errors
            )?;
        }
        Ok(())
    }
}
