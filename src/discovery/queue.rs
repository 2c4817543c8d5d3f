// src/discovery/queue.rs

//! Work queue shared by discovery and the worker pool
//!
//! Paths enter through [`WorkQueue::offer`], which consults the in-flight set
//! so that a path seen by both the watcher and a rescan is only queued once.
//! A path stays in flight from the moment it is offered until a worker calls
//! [`WorkQueue::complete`], including while it waits to be requeued by the
//! readiness gate.
//!
//! Paths a worker gave up on (unreadable, or never settled) are remembered
//! together with the size and mtime they had at that point. Offers of such a
//! path are refused for the rest of the run until the file changes.

use crate::readiness::Observation;
use dashmap::{DashMap, DashSet};
use flume::{Receiver, RecvTimeoutError, Sender};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A queued path plus how many readiness checks it has already failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub attempts: u32,
}

impl WorkItem {
    pub fn new(path: PathBuf) -> Self {
        Self { path, attempts: 0 }
    }
}

pub struct WorkQueue {
    sender: Sender<WorkItem>,
    receiver: Receiver<WorkItem>,
    in_flight: DashSet<PathBuf>,
    abandoned: DashMap<PathBuf, Option<Observation>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self {
            sender,
            receiver,
            in_flight: DashSet::new(),
            abandoned: DashMap::new(),
        }
    }

    /// Queue `path` unless it is already in flight or was abandoned
    ///
    /// Returns whether the path was queued.
    pub fn offer(&self, path: PathBuf) -> bool {
        if self.is_abandoned(&path) {
            return false;
        }
        if !self.in_flight.insert(path.clone()) {
            return false;
        }
        if self.sender.send(WorkItem::new(path.clone())).is_err() {
            self.in_flight.remove(&path);
            return false;
        }
        true
    }

    /// Put an item back for another readiness check; it stays in flight
    pub fn requeue(&self, mut item: WorkItem) {
        item.attempts += 1;
        // The receiver lives as long as self, so send cannot fail here
        let _ = self.sender.send(item);
    }

    /// Wait up to `timeout` for the next item
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkItem> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Release a path after it reached a terminal state
    pub fn complete(&self, path: &Path) {
        self.in_flight.remove(path);
    }

    /// Release `path` and refuse further offers until its size or mtime changes
    pub fn abandon(&self, path: &Path) {
        let seen = Observation::take(path).ok();
        self.abandoned.insert(path.to_path_buf(), seen);
        self.in_flight.remove(path);
    }

    /// Whether `path` was abandoned and has not been touched since
    ///
    /// A changed file is forgotten here and may be offered again.
    pub fn is_abandoned(&self, path: &Path) -> bool {
        let Some(seen) = self.abandoned.get(path).map(|entry| *entry.value()) else {
            return false;
        };
        if Observation::take(path).ok() == seen {
            return true;
        }
        self.abandoned.remove(path);
        false
    }

    pub fn is_in_flight(&self, path: &Path) -> bool {
        self.in_flight.contains(path)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Items waiting in the channel
    pub fn queued(&self) -> usize {
        self.receiver.len()
    }

    /// Nothing queued and nothing owned by a worker
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_dedups_in_flight_paths() {
        let queue = WorkQueue::new();
        let path = PathBuf::from("/in/a.png");

        assert!(queue.offer(path.clone()));
        assert!(!queue.offer(path.clone()));
        assert_eq!(queue.queued(), 1);

        let item = queue.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(item, WorkItem::new(path.clone()));

        // Still owned by a worker
        assert!(!queue.offer(path.clone()));

        queue.complete(&path);
        assert!(queue.is_idle());
        assert!(queue.offer(path));
    }

    #[test]
    fn test_requeue_counts_attempts() {
        let queue = WorkQueue::new();
        queue.offer(PathBuf::from("/in/slow.png"));

        let item = queue.recv_timeout(Duration::from_millis(10)).unwrap();
        queue.requeue(item);
        let item = queue.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(queue.in_flight(), 1);
    }

    #[test]
    fn test_abandoned_path_refused_until_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stuck.png");
        std::fs::write(&path, b"").unwrap();

        let queue = WorkQueue::new();
        assert!(queue.offer(path.clone()));
        queue.recv_timeout(Duration::from_millis(10)).unwrap();
        queue.abandon(&path);

        assert!(queue.is_idle());
        assert!(!queue.offer(path.clone()));
        assert!(!queue.offer(path.clone()));

        std::fs::write(&path, b"now with content").unwrap();
        assert!(!queue.is_abandoned(&path));
        assert!(queue.offer(path));
    }

    #[test]
    fn test_recv_timeout_empty() {
        let queue = WorkQueue::new();
        assert!(queue.recv_timeout(Duration::from_millis(5)).is_none());
    }
}
