// src/discovery/mod.rs

//! Discovery source
//!
//! Candidate paths come from two places: filesystem notifications and
//! periodic full scans of the configured roots. Both feed the same
//! [`WorkQueue`], whose in-flight set keeps a path from being queued twice
//! while a worker owns it.
//!
//! If the notification backend cannot be started, discovery carries on with
//! scans alone.

pub mod queue;
pub mod scanner;
pub mod watcher;

pub use queue::{WorkItem, WorkQueue};
pub use scanner::{ScanFilter, scan_all, scan_root};
pub use watcher::FsWatcher;

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the scan thread checks for shutdown while waiting
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Discovery settings
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub roots: Vec<PathBuf>,
    pub filter: ScanFilter,
    pub scan_interval: Duration,
    /// Emit everything already present before steady-state discovery
    pub scan_existing: bool,
    /// Try to start a notification watcher
    pub watch: bool,
}

pub struct Discovery {
    config: DiscoveryConfig,
    queue: Arc<WorkQueue>,
    /// Paths present at startup that should be left alone
    baseline: Arc<HashSet<PathBuf>>,
}

impl Discovery {
    /// Validate roots; missing or non-directory roots are logged and dropped
    pub fn new(mut config: DiscoveryConfig, queue: Arc<WorkQueue>) -> Result<Self> {
        config.roots.retain(|root| {
            if !root.exists() {
                error!("[discovery] Scan path does not exist: {}", root.display());
                false
            } else if !root.is_dir() {
                error!("[discovery] Scan path is not a directory: {}", root.display());
                false
            } else {
                true
            }
        });

        if config.roots.is_empty() {
            return Err(Error::InitError("no usable scan paths configured".into()));
        }

        // Watcher and scanner must report the same path for the same file
        config.roots = config.roots.iter().map(|r| scanner::normalize(r)).collect();
        config.roots.dedup();

        Ok(Self {
            config,
            queue,
            baseline: Arc::default(),
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.config.roots
    }

    /// Scan every root once and offer what was found
    ///
    /// Returns how many paths were newly queued.
    pub fn scan_once(&self) -> usize {
        scan_all(&self.config.roots, &self.config.filter)
            .into_iter()
            .filter(|path| !self.baseline.contains(path))
            .filter(|path| self.queue.offer(path.clone()))
            .count()
    }

    /// Start the watcher (if enabled) and the scan thread
    ///
    /// With `scan_existing` off, the baseline is taken before the watcher
    /// starts so notifications and rescans skip the same files.
    pub fn spawn(mut self, shutdown: Arc<AtomicBool>) -> Result<DiscoveryHandle> {
        if !self.config.scan_existing {
            self.baseline = Arc::new(
                scan_all(&self.config.roots, &self.config.filter)
                    .into_iter()
                    .collect(),
            );
            info!(
                "[discovery] Skipping {} existing files",
                self.baseline.len()
            );
        }

        let watcher = if self.config.watch {
            match FsWatcher::start(
                &self.config.roots,
                self.config.filter.clone(),
                self.baseline.clone(),
                self.queue.clone(),
            ) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!("[discovery] {}; continuing with periodic scans only", e);
                    None
                }
            }
        } else {
            None
        };

        if self.config.scan_existing {
            let queued = self.scan_once();
            info!("[discovery] Initial scan queued {} files", queued);
        }

        let interval = self.config.scan_interval;
        let scan_thread = thread::Builder::new()
            .name("discovery-scan".into())
            .spawn(move || {
                let mut last_scan = Instant::now();
                while !shutdown.load(Ordering::SeqCst) {
                    thread::sleep(SHUTDOWN_POLL.min(interval));
                    if last_scan.elapsed() < interval {
                        continue;
                    }
                    let queued = self.scan_once();
                    if queued > 0 {
                        info!("[discovery] Rescan queued {} files", queued);
                    } else {
                        debug!("[discovery] Rescan found nothing new");
                    }
                    last_scan = Instant::now();
                }
                debug!("[discovery] Scan thread stopped");
            })
            .map_err(|e| Error::InitError(format!("failed to spawn scan thread: {}", e)))?;

        Ok(DiscoveryHandle {
            scan_thread: Some(scan_thread),
            watcher,
        })
    }
}

/// Keeps discovery running; join after setting the shutdown flag
pub struct DiscoveryHandle {
    scan_thread: Option<JoinHandle<()>>,
    watcher: Option<FsWatcher>,
}

impl DiscoveryHandle {
    /// Whether notifications are currently feeding the queue
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(FsWatcher::is_healthy)
    }

    /// Stop the watcher and wait for the scan thread
    pub fn join(mut self) {
        self.watcher.take();
        if let Some(handle) = self.scan_thread.take()
            && handle.join().is_err()
        {
            error!("[discovery] Scan thread panicked");
        }
    }
}
