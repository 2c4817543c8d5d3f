// src/cli.rs
//! CLI definitions for imgsift
//!
//! This module contains all command-line interface definitions using clap.
//! The actual command implementations are in the `commands` module.

use clap::{Args, Parser, Subcommand};
use imgsift::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imgsift")]
#[command(author = "imgsift Contributors")]
#[command(version)]
#[command(about = "Watch folders for images, drop duplicate content, convert the rest", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the record database and apply migrations
    Init,

    /// Show record totals and reservations that never completed
    Stats {
        /// How many pending reservations to list
        #[arg(long, default_value_t = 20)]
        pending: usize,
    },
}

/// Flags that override the config file and environment
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Record database (path or sqlite://path)
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Directory to watch (repeatable)
    #[arg(long = "scan-path", value_name = "DIR")]
    pub scan_paths: Vec<PathBuf>,

    /// Where converted files are written
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Seconds between full rescans
    #[arg(long, value_name = "SECS")]
    pub scan_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Number of conversion workers (0 = one per CPU)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Remove originals after successful conversion
    #[arg(long)]
    pub delete_originals: bool,

    /// Output format (webp, png, jpeg, bmp, tiff, gif)
    #[arg(long, value_name = "EXT")]
    pub target_format: Option<String>,

    /// Process one folder and exit instead of watching
    #[arg(long, value_name = "DIR")]
    pub batch_process: Option<PathBuf>,

    /// Do not descend into subdirectories
    #[arg(long)]
    pub no_recursive: bool,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.database_url {
            config.store.database_url = url.clone();
        }
        if !self.scan_paths.is_empty() {
            config.scan.paths = self.scan_paths.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.pipeline.output_dir = dir.clone();
        }
        if let Some(secs) = self.scan_interval {
            config.scan.interval_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if self.delete_originals {
            config.pipeline.delete_originals = true;
        }
        if let Some(format) = &self.target_format {
            config.pipeline.target_format = format.clone();
        }
        if self.no_recursive {
            config.scan.recursive = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "imgsift",
            "--scan-path",
            "/in/a",
            "--scan-path",
            "/in/b",
            "--workers",
            "3",
            "--delete-originals",
            "--target-format",
            "png",
            "--no-recursive",
        ]);

        let mut config = Config::default();
        cli.run.apply(&mut config);

        assert_eq!(config.scan.paths, vec![PathBuf::from("/in/a"), PathBuf::from("/in/b")]);
        assert_eq!(config.pipeline.workers, 3);
        assert!(config.pipeline.delete_originals);
        assert_eq!(config.pipeline.target_format, "png");
        assert!(!config.scan.recursive);
    }

    #[test]
    fn test_global_flags_on_subcommand() {
        let cli = Cli::parse_from(["imgsift", "stats", "--database-url", "sqlite:///tmp/x.db"]);
        assert!(matches!(cli.command, Some(Commands::Stats { pending: 20 })));
        assert_eq!(cli.run.database_url.as_deref(), Some("sqlite:///tmp/x.db"));
    }
}
