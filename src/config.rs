// src/config.rs
//! Configuration for imgsift
//!
//! Settings come from three layers, later layers winning:
//! 1. An optional TOML file (`--config`)
//! 2. Environment variables (`DATABASE_URL`, `SCAN_PATHS`, ...)
//! 3. Command-line flags (applied by the CLI layer)
//!
//! The file has the following sections:
//! - [store] - Database location, pool size, retry policy
//! - [scan] - Scan roots, rescan interval, watch toggle, extensions
//! - [pipeline] - Output directory, target format, workers, readiness tuning
//! - [logging] - Log level and stats interval

use crate::convert::TargetFormat;
use crate::db::RetryPolicy;
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extensions picked up by discovery when none are configured
pub const DEFAULT_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "gif", "bmp", "tiff", "tif", "webp"];

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Record store settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    /// SQLite database path, optionally prefixed with `sqlite://`
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Number of pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// How long a worker waits for a free connection
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Attempt ceiling for transient store failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff cap
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            pool_size: default_pool_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://imgsift.db".to_string()
}

fn default_pool_size() -> usize {
    8
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    50
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

/// Discovery settings
#[derive(Debug, Clone, Deserialize)]
pub struct ScanSection {
    /// Directories to watch and rescan
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    /// Seconds between full rescans
    #[serde(default = "default_scan_interval")]
    pub interval_secs: u64,

    /// Descend into subdirectories
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Enumerate existing content once at startup
    #[serde(default = "default_true")]
    pub scan_existing: bool,

    /// Use filesystem notifications in addition to rescans
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Lowercase extensions (without dot) accepted by discovery
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            interval_secs: default_scan_interval(),
            recursive: true,
            scan_existing: true,
            watch: true,
            extensions: default_extensions(),
        }
    }
}

fn default_scan_interval() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect()
}

/// Worker pool and per-file pipeline settings
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    /// Where converted files are written
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Target format extension (webp, png, jpeg, bmp, tiff, gif)
    #[serde(default = "default_target_format")]
    pub target_format: String,

    /// Remove the source after a successful conversion
    #[serde(default)]
    pub delete_originals: bool,

    /// Number of concurrent workers (0 = one per CPU)
    #[serde(default)]
    pub workers: usize,

    /// Fingerprint algorithm (sha256, blake3)
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Read window used while hashing
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Gap between the two readiness observations
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,

    /// Readiness checks before a file is abandoned
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// How long shutdown waits for in-flight files
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            target_format: default_target_format(),
            delete_originals: false,
            workers: 0,
            hash_algorithm: default_hash_algorithm(),
            chunk_size: default_chunk_size(),
            quiescence_ms: default_quiescence_ms(),
            readiness_attempts: default_readiness_attempts(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./converted_images")
}

fn default_target_format() -> String {
    "webp".to_string()
}

fn default_hash_algorithm() -> String {
    "sha256".to_string()
}

fn default_chunk_size() -> usize {
    crate::hash::DEFAULT_CHUNK_SIZE
}

fn default_quiescence_ms() -> u64 {
    500
}

fn default_readiness_attempts() -> u32 {
    10
}

fn default_drain_timeout() -> u64 {
    30
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Default level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Seconds between stats lines in watch mode
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stats_interval() -> u64 {
    30
}

impl Config {
    /// Load from an optional TOML file, then overlay the process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::parse(&content)
    }

    /// Parse TOML configuration content
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid config: {}", e)))
    }

    /// Overlay environment variables using the given lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.database_url = url;
        }

        // SCAN_PATHS wins over the older WATCH_PATHS name
        if let Some(paths) = lookup("SCAN_PATHS").or_else(|| lookup("WATCH_PATHS")) {
            let parsed = split_paths(&paths);
            if !parsed.is_empty() {
                self.scan.paths = parsed;
            }
        }

        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.pipeline.output_dir = PathBuf::from(dir);
        }
        if let Some(interval) = lookup("SCAN_INTERVAL") {
            self.scan.interval_secs = parse_number("SCAN_INTERVAL", &interval)?;
        }
        if let Some(flag) = lookup("DELETE_ORIGINALS") {
            self.pipeline.delete_originals = parse_bool("DELETE_ORIGINALS", &flag)?;
        }
        if let Some(workers) = lookup("WORKER_COUNT") {
            self.pipeline.workers = parse_number("WORKER_COUNT", &workers)?;
        }
        if let Some(format) = lookup("TARGET_FORMAT") {
            self.pipeline.target_format = format;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Check settings that would otherwise fail deep inside a worker
    pub fn validate(&self) -> Result<()> {
        if self.store.pool_size == 0 {
            return Err(Error::Config("store.pool_size must be at least 1".into()));
        }
        if self.store.retry_attempts == 0 {
            return Err(Error::Config("store.retry_attempts must be at least 1".into()));
        }
        if self.pipeline.readiness_attempts == 0 {
            return Err(Error::Config(
                "pipeline.readiness_attempts must be at least 1".into(),
            ));
        }
        if self.pipeline.chunk_size == 0 {
            return Err(Error::Config("pipeline.chunk_size must be at least 1".into()));
        }
        self.target_format()?;
        self.hash_algorithm()?;
        Ok(())
    }

    /// Filesystem path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        let url = self.store.database_url.as_str();
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url);
        PathBuf::from(path)
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        if self.pipeline.workers > 0 {
            self.pipeline.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn target_format(&self) -> Result<TargetFormat> {
        self.pipeline.target_format.parse()
    }

    pub fn hash_algorithm(&self) -> Result<HashAlgorithm> {
        self.pipeline
            .hash_algorithm
            .parse()
            .map_err(|e| Error::Config(format!("pipeline.hash_algorithm: {}", e)))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store.retry_attempts,
            base_delay: Duration::from_millis(self.store.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.store.retry_max_delay_ms),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.store.acquire_timeout_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan.interval_secs.max(1))
    }

    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.pipeline.quiescence_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.drain_timeout_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.logging.stats_interval_secs.max(1))
    }
}

fn split_paths(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} must be a boolean, got '{}'", key, value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pipeline.target_format, "webp");
        assert_eq!(config.scan.interval_secs, 5);
        assert!(config.scan.recursive);
        assert!(!config.pipeline.delete_originals);
        assert_eq!(config.scan.extensions.len(), 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::parse(
            r#"
            [store]
            database_url = "sqlite:///var/lib/imgsift/records.db"
            pool_size = 4

            [scan]
            paths = ["/srv/incoming", "/srv/drop"]
            recursive = false

            [pipeline]
            target_format = "png"
            workers = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.store.pool_size, 4);
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/imgsift/records.db"));
        assert_eq!(config.scan.paths.len(), 2);
        assert!(!config.scan.recursive);
        assert_eq!(config.worker_count(), 3);
        // Unspecified fields keep their defaults
        assert_eq!(config.pipeline.readiness_attempts, 10);
    }

    #[test]
    fn test_env_overlay() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("DATABASE_URL", "/tmp/x.db"),
                ("SCAN_PATHS", " /a , /b ,"),
                ("OUTPUT_DIR", "/out"),
                ("SCAN_INTERVAL", "12"),
                ("DELETE_ORIGINALS", "true"),
                ("WORKER_COUNT", "6"),
                ("LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/x.db"));
        assert_eq!(config.scan.paths, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(config.pipeline.output_dir, PathBuf::from("/out"));
        assert_eq!(config.scan.interval_secs, 12);
        assert!(config.pipeline.delete_originals);
        assert_eq!(config.pipeline.workers, 6);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_legacy_watch_paths() {
        let mut config = Config::default();
        config.apply_env(env(&[("WATCH_PATHS", "/legacy")])).unwrap();
        assert_eq!(config.scan.paths, vec![PathBuf::from("/legacy")]);

        let mut config = Config::default();
        config
            .apply_env(env(&[("WATCH_PATHS", "/legacy"), ("SCAN_PATHS", "/new")]))
            .unwrap();
        assert_eq!(config.scan.paths, vec![PathBuf::from("/new")]);
    }

    #[test]
    fn test_bad_env_values() {
        let mut config = Config::default();
        assert!(config.apply_env(env(&[("WORKER_COUNT", "many")])).is_err());
        assert!(config.apply_env(env(&[("DELETE_ORIGINALS", "perhaps")])).is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_format() {
        let mut config = Config::default();
        config.pipeline.target_format = "psd".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
