// src/readiness.rs

//! Readiness gate
//!
//! Upstream producers write files in place, so a path can show up long before
//! its content is complete. A path is ready once its size and modification
//! time are unchanged across two observations one quiescence interval apart,
//! its size is non-zero, and it can be opened for reading.

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime};

/// One look at a file's size and mtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Observation {
    /// Read the current size and mtime of `path`
    pub fn take(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            size: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Result of a readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Stable and readable; carries the observed size
    Ready { size: u64 },
    /// Still changing, empty, or not openable yet
    NotReady,
    /// The path no longer exists
    Missing,
}

#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    quiescence: Duration,
    max_attempts: u32,
}

impl ReadinessGate {
    pub fn new(quiescence: Duration, max_attempts: u32) -> Self {
        Self {
            quiescence,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn quiescence(&self) -> Duration {
        self.quiescence
    }

    /// Checks allowed before a path is abandoned
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Observe `path` twice, one quiescence interval apart
    ///
    /// Blocks the calling thread for the interval.
    pub fn check(&self, path: &Path) -> Readiness {
        let first = match Observation::take(path) {
            Ok(obs) => obs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Readiness::Missing,
            Err(_) => return Readiness::NotReady,
        };

        thread::sleep(self.quiescence);

        let second = match Observation::take(path) {
            Ok(obs) => obs,
            Err(e) if e.kind() == ErrorKind::NotFound => return Readiness::Missing,
            Err(_) => return Readiness::NotReady,
        };

        // Stability alone is not enough here: a zero-length file counts as not
        // yet written. Reserving the empty-content fingerprint would turn every
        // later empty upload into a duplicate of a file that never converted.
        if first != second || second.size == 0 {
            return Readiness::NotReady;
        }

        match File::open(path) {
            Ok(_) => Readiness::Ready { size: second.size },
            Err(e) if e.kind() == ErrorKind::NotFound => Readiness::Missing,
            Err(_) => Readiness::NotReady,
        }
    }

    pub fn is_ready(&self, path: &Path) -> bool {
        matches!(self.check(path), Readiness::Ready { .. })
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn gate() -> ReadinessGate {
        ReadinessGate::new(Duration::from_millis(30), 3)
    }

    #[test]
    fn test_stable_file_is_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.png");
        fs::write(&path, b"complete").unwrap();

        assert_eq!(gate().check(&path), Readiness::Ready { size: 8 });
        assert!(gate().is_ready(&path));
    }

    #[test]
    fn test_empty_file_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.png");
        fs::write(&path, b"").unwrap();

        assert_eq!(gate().check(&path), Readiness::NotReady);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(gate().check(&dir.path().join("nope.png")), Readiness::Missing);
    }

    #[test]
    fn test_growing_file_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.png");
        fs::write(&path, b"start").unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let path = path.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
                while !stop.load(Ordering::SeqCst) {
                    file.write_all(b"more").unwrap();
                    file.flush().unwrap();
                    thread::sleep(Duration::from_millis(5));
                }
            })
        };

        thread::sleep(Duration::from_millis(10));
        assert_eq!(gate().check(&path), Readiness::NotReady);

        stop.store(true, Ordering::SeqCst);
        writer.join().unwrap();
        assert!(gate().is_ready(&path));
    }
}
