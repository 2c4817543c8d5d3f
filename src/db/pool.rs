// src/db/pool.rs

//! Bounded SQLite connection pool
//!
//! A fixed set of connections is opened up front and parked in a bounded
//! channel. Workers take one with [`ConnectionPool::acquire`], which blocks up
//! to the acquire timeout, and give it back by dropping the guard.

use crate::error::{Error, Result};
use flume::{Receiver, RecvTimeoutError, Sender};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// How long SQLite itself waits on a locked database before reporting BUSY
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a single connection with the settings every pooled handle shares
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        debug!("[store] journal_mode is {} for {}", mode, path.display());
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(conn)
}

/// Fixed-size pool of connections to one database file
#[derive(Clone)]
pub struct ConnectionPool {
    sender: Sender<Connection>,
    receiver: Receiver<Connection>,
    size: usize,
    acquire_timeout: Duration,
    path: PathBuf,
}

impl ConnectionPool {
    /// Open `size` connections to the database at `path`
    pub fn open(path: &Path, size: usize, acquire_timeout: Duration) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("connection pool size must be at least 1".into()));
        }

        let (sender, receiver) = flume::bounded(size);
        for _ in 0..size {
            let conn = open_connection(path)?;
            sender
                .send(conn)
                .map_err(|_| Error::InitError("connection pool channel closed".into()))?;
        }

        debug!(
            "[store] Opened pool of {} connections to {}",
            size,
            path.display()
        );

        Ok(Self {
            sender,
            receiver,
            size,
            acquire_timeout,
            path: path.to_path_buf(),
        })
    }

    /// Take a connection, waiting up to the acquire timeout
    pub fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        match self.receiver.recv_timeout(self.acquire_timeout) {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                sender: self.sender.clone(),
            }),
            Err(RecvTimeoutError::Timeout) => Err(Error::PoolTimeout {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::InitError("connection pool closed".into()))
            }
        }
    }

    /// Total number of connections
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently parked in the pool
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Database file backing this pool
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A connection borrowed from the pool; returned on drop
pub struct PooledConnection {
    conn: Option<Connection>,
    sender: Sender<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `drop` takes the connection out
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Fails only when every pool handle is gone; the connection just closes
            let _ = self.sender.send(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_pool(size: usize, timeout_ms: u64) -> (TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(
            &dir.path().join("pool.db"),
            size,
            Duration::from_millis(timeout_ms),
        )
        .unwrap();
        (dir, pool)
    }

    #[test]
    fn test_acquire_and_release() {
        let (_dir, pool) = test_pool(2, 100);
        assert_eq!(pool.available(), 2);

        {
            let conn = pool.acquire().unwrap();
            assert_eq!(pool.available(), 1);
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
            assert_eq!(one, 1);
        }

        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let (_dir, pool) = test_pool(1, 50);

        let held = pool.acquire().unwrap();
        let err = pool.acquire().err().unwrap();
        assert!(matches!(err, Error::PoolTimeout { .. }));
        assert!(err.is_transient());

        drop(held);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn test_waiter_gets_released_connection() {
        let (_dir, pool) = test_pool(1, 2_000);
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.acquire().map(|_| ()))
        };

        std::thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConnectionPool::open(&dir.path().join("x.db"), 0, Duration::from_millis(1)).is_err());
    }
}
