// src/discovery/watcher.rs

//! Filesystem notification source
//!
//! Wraps a `notify` recommended watcher. Creation, data modification, write
//! close, and rename-into events for matching files are offered to the work
//! queue, except for paths in the startup baseline. The watcher stops when
//! the returned handle is dropped.

use super::queue::WorkQueue;
use super::scanner::ScanFilter;
use crate::error::{Error, Result};
use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Paths in `event` that may have become candidate files
fn candidate_paths(event: &Event) -> Vec<&Path> {
    match &event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any)
        | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any)
        | EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.iter().map(PathBuf::as_path).collect()
        }
        // From and to in one event; only the destination is new
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1).map(PathBuf::as_path).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

/// A running notification watch over the scan roots
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    healthy: Arc<AtomicBool>,
}

impl FsWatcher {
    /// Start watching `roots`, offering matching paths to `queue`
    ///
    /// Paths in `baseline` are never offered.
    pub fn start(
        roots: &[PathBuf],
        filter: ScanFilter,
        baseline: Arc<HashSet<PathBuf>>,
        queue: Arc<WorkQueue>,
    ) -> Result<Self> {
        let healthy = Arc::new(AtomicBool::new(true));
        let mode = if filter.is_recursive() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        let handler_healthy = healthy.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for path in candidate_paths(&event) {
                    if baseline.contains(path) || !filter.matches(path) || !path.is_file() {
                        continue;
                    }
                    if queue.offer(path.to_path_buf()) {
                        debug!("[discovery] Queued {} from notification", path.display());
                    }
                }
            }
            Err(e) => {
                if handler_healthy.swap(false, Ordering::SeqCst) {
                    warn!("[discovery] Watch backend error, relying on rescans: {}", e);
                }
            }
        })
        .map_err(|e| Error::InitError(format!("failed to create watcher: {}", e)))?;

        for root in roots {
            watcher
                .watch(root, mode)
                .map_err(|e| Error::InitError(format!("failed to watch {}: {}", root.display(), e)))?;
            info!("[discovery] Watching {}", root.display());
        }

        Ok(Self {
            _watcher: watcher,
            healthy,
        })
    }

    /// False once the backend has reported an error
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
