// src/pipeline/worker.rs

//! Fixed-size worker pool
//!
//! Each worker is a named OS thread pulling from the shared work queue with
//! a short receive timeout, so it notices the shutdown flag promptly even
//! when the queue is empty.

use super::Pipeline;
use crate::discovery::WorkQueue;
use crate::error::{Error, Result};
use flume::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a worker blocks on an empty queue before rechecking shutdown
const RECV_TIMEOUT: Duration = Duration::from_millis(500);

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    done_rx: Receiver<usize>,
    pipeline: Arc<Pipeline>,
}

impl WorkerPool {
    /// Spawn `workers` threads running `pipeline`
    pub fn start(pipeline: Arc<Pipeline>, workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (done_tx, done_rx) = flume::bounded(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 1..=workers {
            let pipeline = pipeline.clone();
            let done_tx = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("ingest-worker-{}", id))
                .spawn(move || {
                    debug!("[worker-{}] Started", id);
                    let queue = pipeline.queue().clone();
                    let shutdown = pipeline.shutdown_flag().clone();
                    while !shutdown.load(Ordering::SeqCst) {
                        if let Some(item) = queue.recv_timeout(RECV_TIMEOUT) {
                            pipeline.handle(item, id);
                        }
                    }
                    debug!("[worker-{}] Stopped", id);
                    let _ = done_tx.send(id);
                })
                .map_err(|e| Error::InitError(format!("failed to spawn worker {}: {}", id, e)))?;
            handles.push(handle);
        }

        info!("Started {} workers", workers);
        Ok(Self {
            handles,
            done_rx,
            pipeline,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal shutdown and wait up to `drain_timeout` for workers to finish
    ///
    /// Workers finish the file they hold (a reserved file always runs to
    /// completion). Returns false if some workers were still busy when the
    /// timeout expired; those threads are detached.
    pub fn shutdown(self, drain_timeout: Duration) -> bool {
        self.pipeline.request_shutdown();

        let deadline = Instant::now() + drain_timeout;
        let mut remaining = self.handles.len();
        while remaining > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(left) {
                Ok(_) => remaining -= 1,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if remaining > 0 {
            warn!(
                "{} workers still busy after {:?}; abandoning them",
                remaining, drain_timeout
            );
            return false;
        }

        for handle in self.handles {
            if handle.join().is_err() {
                warn!("A worker thread panicked");
            }
        }
        info!("All workers stopped");
        true
    }
}

/// Block until every queued and in-flight path has reached a terminal state
///
/// Returns false if `stop` was raised first.
pub fn wait_until_idle(queue: &WorkQueue, stop: &AtomicBool, poll: Duration) -> bool {
    loop {
        if queue.is_idle() {
            return true;
        }
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        thread::sleep(poll);
    }
}
