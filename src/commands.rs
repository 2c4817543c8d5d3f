// src/commands.rs
//! Command handlers for the imgsift CLI

mod batch;
mod store;
mod watch;

pub use batch::cmd_batch;
pub use store::{cmd_init, cmd_stats};
pub use watch::cmd_watch;

use anyhow::{Context, Result};
use imgsift::convert::{Converter, ImageConverter};
use imgsift::discovery::{ScanFilter, WorkQueue};
use imgsift::pipeline::{Pipeline, PipelineSettings};
use imgsift::readiness::ReadinessGate;
use imgsift::{Config, RecordStore};
use std::sync::Arc;
use tracing::info;

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins; otherwise the configured level; otherwise `info`.
pub fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Open the store for one-off commands
fn open_store(config: &Config, pool_size: usize) -> Result<RecordStore> {
    let path = config.database_path();
    RecordStore::connect(
        &path,
        pool_size,
        config.acquire_timeout(),
        config.retry_policy(),
    )
    .with_context(|| format!("Failed to open record store at {}", path.display()))
}

/// Wire the store, converter and queue into a pipeline
fn build_pipeline(config: &Config) -> Result<Arc<Pipeline>> {
    let store = open_store(config, config.store.pool_size)?;
    let format = config.target_format()?;
    let converter: Arc<dyn Converter> = Arc::new(ImageConverter::new(format));

    let settings = PipelineSettings {
        gate: ReadinessGate::new(config.quiescence(), config.pipeline.readiness_attempts),
        algorithm: config.hash_algorithm()?,
        chunk_size: config.pipeline.chunk_size,
        output_dir: config.pipeline.output_dir.clone(),
        delete_originals: config.pipeline.delete_originals,
    };

    info!(
        "Converting to {} in {} (delete originals: {})",
        format,
        settings.output_dir.display(),
        settings.delete_originals
    );

    Ok(Arc::new(Pipeline::new(
        store,
        converter,
        Arc::new(WorkQueue::new()),
        settings,
    )))
}

/// Discovery filter shared by watch and batch mode
///
/// Creates the output directory first so it can be excluded by its
/// canonical path.
fn scan_filter(config: &Config) -> Result<ScanFilter> {
    let output_dir = &config.pipeline.output_dir;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;

    Ok(ScanFilter::new(&config.scan.extensions, config.scan.recursive).exclude(output_dir))
}

/// Log the periodic stats line, refreshing the record total
fn report_stats(pipeline: &Pipeline) {
    match pipeline.store().total_records() {
        Ok(total) => pipeline.stats().set_total_records(total),
        Err(e) => tracing::warn!("[store] Could not read record total: {}", e),
    }
    info!("Stats: {}", pipeline.stats().snapshot());
}
