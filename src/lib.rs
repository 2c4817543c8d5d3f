// src/lib.rs

//! imgsift
//!
//! Watches folders for images, identifies each file by a content
//! fingerprint, discards byte-identical duplicates, and converts every
//! distinct image to a target format exactly once.
//!
//! # Architecture
//!
//! - Discovery: filesystem notifications plus periodic rescans feed one queue
//! - Readiness: files are only touched once their size and mtime settle
//! - Record store: SQLite with a unique fingerprint index as the single
//!   deduplication gate (no check-then-insert)
//! - Pipeline: a fixed pool of worker threads runs each file through a
//!   validated state machine

pub mod config;
pub mod convert;
pub mod db;
pub mod discovery;
mod error;
pub mod hash;
pub mod pipeline;
pub mod readiness;
pub mod stats;

pub use config::Config;
pub use convert::{Converter, ImageConverter, TargetFormat};
pub use db::{FileMetadata, FileRecord, InsertOutcome, RecordStore, RetryPolicy};
pub use error::{Error, Result};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use pipeline::{Outcome, Pipeline, PipelineSettings, PipelineState};
pub use stats::{Stats, StatsSnapshot};
