// src/pipeline/mod.rs

//! Per-file pipeline
//!
//! Every discovered path is driven through a fixed state machine:
//!
//! ```text
//! Discovered -> Ready -> Hashed -> DuplicateDetected -> Deleted ---------------------> Terminal
//!                                \-> Unique -> Converted -> SourceRemoved | SourceRetained -> Terminal
//! ```
//!
//! The fingerprint reservation in the record store is the point of no
//! return. Before it, a shutdown request interrupts the file and leaves it on
//! disk for the next run. After it, the file is carried through to a
//! terminal state so the reservation is never left dangling by choice.
//!
//! The record is completed (`mark_processed`) before the source is touched,
//! so a crash between conversion and deletion never loses the fact that the
//! content was converted.

pub mod worker;

pub use worker::{WorkerPool, wait_until_idle};

use crate::convert::{self, Converter};
use crate::db::{FileMetadata, FileRecord, InsertOutcome, RecordStore};
use crate::discovery::{WorkItem, WorkQueue};
use crate::error::{Error, Result};
use crate::hash::{self, HashAlgorithm};
use crate::readiness::{Readiness, ReadinessGate};
use crate::stats::Stats;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Pipeline state for one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Path was handed to a worker
    Discovered,
    /// Size and mtime settled
    Ready,
    /// Fingerprint computed
    Hashed,
    /// Fingerprint already reserved by another file
    DuplicateDetected,
    /// This file reserved the fingerprint - POINT OF NO RETURN
    Unique,
    /// Duplicate source removed
    Deleted,
    /// Output written and record completed
    Converted,
    /// Original removed after conversion
    SourceRemoved,
    /// Original kept after conversion
    SourceRetained,
    Terminal,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Ready => "ready",
            Self::Hashed => "hashed",
            Self::DuplicateDetected => "duplicate_detected",
            Self::Unique => "unique",
            Self::Deleted => "deleted",
            Self::Converted => "converted",
            Self::SourceRemoved => "source_removed",
            Self::SourceRetained => "source_retained",
            Self::Terminal => "terminal",
        }
    }

    /// Whether the machine has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Discovered, Ready | Terminal)
                | (Ready, Hashed | Terminal)
                | (Hashed, DuplicateDetected | Unique | Terminal)
                | (DuplicateDetected, Deleted | Terminal)
                | (Unique, Converted | Terminal)
                | (Converted, SourceRemoved | SourceRetained)
                | (Deleted | SourceRemoved | SourceRetained, Terminal)
        )
    }

    /// Returns true while stopping leaves no trace in the store
    pub fn is_interruptible(&self) -> bool {
        matches!(self, Self::Discovered | Self::Ready | Self::Hashed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one file, rejecting edges the machine does not have
#[derive(Debug)]
struct Tracker {
    state: PipelineState,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: PipelineState::Discovered,
        }
    }

    fn advance(&mut self, next: PipelineState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

/// How a file left the pipeline
#[derive(Debug)]
pub enum Outcome {
    /// Content was new; output written and record completed
    Converted {
        record: FileRecord,
        target: PathBuf,
        source_removed: bool,
    },
    /// Content was already reserved; `existing` is the winning record
    Duplicate {
        existing: FileRecord,
        source_removed: bool,
    },
    /// Path is the recorded source of its own content; left alone
    AlreadyRecorded { existing: FileRecord },
    /// Not settled yet; put back on the queue
    Requeued,
    /// Path disappeared before it could be processed
    Vanished,
    /// Shutdown was requested before the fingerprint was reserved
    Interrupted,
    Failed(Error),
}

/// Static settings for a [`Pipeline`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub gate: ReadinessGate,
    pub algorithm: HashAlgorithm,
    pub chunk_size: usize,
    pub output_dir: PathBuf,
    pub delete_originals: bool,
}

/// Everything a worker needs to process files
pub struct Pipeline {
    store: RecordStore,
    converter: Arc<dyn Converter>,
    queue: Arc<WorkQueue>,
    settings: PipelineSettings,
    stats: Arc<Stats>,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        store: RecordStore,
        converter: Arc<dyn Converter>,
        queue: Arc<WorkQueue>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            converter,
            queue,
            settings,
            stats: Arc::new(Stats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Flag shared with discovery and workers; set it to stop
    pub fn shutdown_flag(&self) -> &Arc<AtomicBool> {
        &self.shutdown
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run one item through the pipeline and do the bookkeeping
    ///
    /// Updates stats, logs the outcome, and releases the path from the
    /// in-flight set unless it was requeued. Paths that could not be read or
    /// never settled are abandoned for the rest of the run.
    pub fn handle(&self, item: WorkItem, worker_id: usize) -> Outcome {
        let path = item.path.clone();
        let outcome = self.process(item);

        match &outcome {
            Outcome::Converted {
                target,
                source_removed,
                record,
            } => {
                self.stats.record_processed();
                info!(
                    "[worker-{}] Converted {} -> {} ({}){}",
                    worker_id,
                    path.display(),
                    target.display(),
                    &record.fingerprint[..record.fingerprint.len().min(12)],
                    if *source_removed { ", original removed" } else { "" }
                );
            }
            Outcome::Duplicate {
                existing,
                source_removed,
            } => {
                self.stats.record_duplicate();
                info!(
                    "[worker-{}] Duplicate {} of {}{}",
                    worker_id,
                    path.display(),
                    existing.source_path,
                    if *source_removed { ", removed" } else { ", removal failed" }
                );
            }
            Outcome::AlreadyRecorded { existing } => {
                debug!(
                    "[worker-{}] {} already recorded ({})",
                    worker_id,
                    path.display(),
                    if existing.is_processed() { "converted" } else { "pending" }
                );
            }
            Outcome::Requeued => {
                debug!("[worker-{}] {} not ready yet, requeued", worker_id, path.display());
            }
            Outcome::Vanished => {
                debug!("[worker-{}] {} disappeared", worker_id, path.display());
            }
            Outcome::Interrupted => {
                self.stats.record_interrupted();
                info!(
                    "[worker-{}] Shutdown before reserving {}, left in place",
                    worker_id,
                    path.display()
                );
            }
            Outcome::Failed(e) => {
                self.stats.record_error(e);
                error!("[worker-{}] {} ({})", worker_id, e, e.kind());
            }
        }

        match &outcome {
            Outcome::Requeued => {}
            Outcome::Failed(Error::Read { .. } | Error::NotReady { .. }) => {
                self.queue.abandon(&path)
            }
            _ => self.queue.complete(&path),
        }

        outcome
    }

    /// Drive `item` through the state machine
    pub fn process(&self, item: WorkItem) -> Outcome {
        match self.run(item) {
            Ok(outcome) => outcome,
            Err(e) => Outcome::Failed(e),
        }
    }

    fn run(&self, item: WorkItem) -> Result<Outcome> {
        let path_buf = item.path.clone();
        let path = path_buf.as_path();
        let mut tracker = Tracker::new();

        if self.stopping() {
            return Ok(Outcome::Interrupted);
        }

        let gate = &self.settings.gate;
        match gate.check(path) {
            Readiness::Ready { .. } => {}
            Readiness::Missing => return Ok(Outcome::Vanished),
            Readiness::NotReady => {
                let attempts = item.attempts + 1;
                if attempts >= gate.max_attempts() {
                    return Err(Error::NotReady {
                        path: path.to_path_buf(),
                        attempts,
                    });
                }
                if self.stopping() {
                    return Ok(Outcome::Interrupted);
                }
                self.queue.requeue(item);
                return Ok(Outcome::Requeued);
            }
        }
        tracker.advance(PipelineState::Ready)?;

        if self.stopping() {
            return Ok(Outcome::Interrupted);
        }

        // One read feeds both the fingerprint and the converter
        let read_err = |source| Error::Read {
            path: path.to_path_buf(),
            source,
        };
        let data = fs::read(path).map_err(read_err)?;
        let fingerprint = hash::hash_reader(
            self.settings.algorithm,
            &mut Cursor::new(&data),
            self.settings.chunk_size,
        )
        .map_err(read_err)?;
        tracker.advance(PipelineState::Hashed)?;
        debug!("{} hashed to {}", path.display(), fingerprint.short());

        // Last safe point; past the reservation the file must finish
        if self.stopping() {
            return Ok(Outcome::Interrupted);
        }

        let meta = FileMetadata::from_path(path, data.len() as u64, self.settings.algorithm);
        match self.store.insert_if_absent(&fingerprint, &meta)? {
            InsertOutcome::AlreadyExists(existing) => {
                tracker.advance(PipelineState::DuplicateDetected)?;
                self.discard_duplicate(path, existing, &mut tracker)
            }
            InsertOutcome::Inserted(record) => {
                tracker.advance(PipelineState::Unique)?;
                self.convert_unique(path, &data, record, &mut tracker)
            }
        }
    }

    fn discard_duplicate(
        &self,
        path: &Path,
        existing: FileRecord,
        tracker: &mut Tracker,
    ) -> Result<Outcome> {
        // A retained original seen again by a rescan matches its own record
        if Path::new(&existing.source_path) == path {
            tracker.advance(PipelineState::Terminal)?;
            return Ok(Outcome::AlreadyRecorded { existing });
        }

        if !existing.is_processed() {
            warn!(
                "Content of {} was reserved by {} but never converted",
                path.display(),
                existing.source_path
            );
        }

        let source_removed = match fs::remove_file(path) {
            Ok(()) => {
                tracker.advance(PipelineState::Deleted)?;
                true
            }
            Err(source) => {
                let err = Error::Deletion {
                    path: path.to_path_buf(),
                    source,
                };
                warn!("{}", err);
                self.stats.record_deletion_failure();
                false
            }
        };
        tracker.advance(PipelineState::Terminal)?;

        Ok(Outcome::Duplicate {
            existing,
            source_removed,
        })
    }

    fn convert_unique(
        &self,
        path: &Path,
        data: &[u8],
        mut record: FileRecord,
        tracker: &mut Tracker,
    ) -> Result<Outcome> {
        let converted = self.converter.convert(path, data)?;
        let target = convert::write_output(
            &self.settings.output_dir,
            path,
            self.converter.target_extension(),
            &converted,
        )
        .map_err(|e| Error::Conversion {
            path: path.to_path_buf(),
            reason: format!("failed to write output: {}", e),
        })?;

        if let Err(e) = self.store.mark_processed(&record.fingerprint, &target) {
            warn!(
                "Output {} written but not recorded; keeping {}",
                target.display(),
                path.display()
            );
            return Err(e);
        }
        tracker.advance(PipelineState::Converted)?;

        match self.store.find_by_fingerprint(&record.fingerprint) {
            Ok(Some(updated)) => record = updated,
            _ => record.target_path = Some(target.to_string_lossy().into_owned()),
        }

        let source_removed = if self.settings.delete_originals {
            match fs::remove_file(path) {
                Ok(()) => true,
                Err(source) => {
                    warn!(
                        "{}",
                        Error::Deletion {
                            path: path.to_path_buf(),
                            source,
                        }
                    );
                    self.stats.record_deletion_failure();
                    false
                }
            }
        } else {
            false
        };
        tracker.advance(if source_removed {
            PipelineState::SourceRemoved
        } else {
            PipelineState::SourceRetained
        })?;
        tracker.advance(PipelineState::Terminal)?;

        Ok(Outcome::Converted {
            record,
            target,
            source_removed,
        })
    }
}
