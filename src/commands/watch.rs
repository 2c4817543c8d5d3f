// src/commands/watch.rs
//! Long-running watch mode

use super::{build_pipeline, report_stats, scan_filter};
use anyhow::{Result, bail};
use imgsift::Config;
use imgsift::discovery::{Discovery, DiscoveryConfig};
use imgsift::pipeline::{Pipeline, WorkerPool};
use std::time::Duration;
use tracing::{info, warn};

/// Watch the configured roots until interrupted
pub fn cmd_watch(config: Config) -> Result<()> {
    if config.scan.paths.is_empty() {
        bail!("No scan paths configured (use --scan-path or SCAN_PATHS)");
    }

    let pipeline = build_pipeline(&config)?;

    let discovery = Discovery::new(
        DiscoveryConfig {
            roots: config.scan.paths.clone(),
            filter: scan_filter(&config)?,
            scan_interval: config.scan_interval(),
            scan_existing: config.scan.scan_existing,
            watch: config.scan.watch,
        },
        pipeline.queue().clone(),
    )?;

    let workers = WorkerPool::start(pipeline.clone(), config.worker_count())?;
    let discovery = discovery.spawn(pipeline.shutdown_flag().clone())?;

    info!(
        "Watching {} paths with {} workers (notifications: {})",
        config.scan.paths.len(),
        workers.size(),
        if discovery.is_watching() { "on" } else { "off, scan only" }
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(supervise(&pipeline, config.stats_interval()))?;

    info!("Shutting down");
    pipeline.request_shutdown();
    discovery.join();
    if !workers.shutdown(config.drain_timeout()) {
        warn!("Exiting with workers still running");
    }

    report_stats(&pipeline);
    Ok(())
}

/// Wait for Ctrl-C, logging stats on every tick
async fn supervise(pipeline: &Pipeline, every: Duration) -> Result<()> {
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal");
                return Ok(());
            }
            _ = ticker.tick() => report_stats(pipeline),
        }
    }
}
