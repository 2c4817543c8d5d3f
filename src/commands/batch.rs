// src/commands/batch.rs
//! One-shot processing of a single folder

use super::{build_pipeline, scan_filter};
use anyhow::{Result, bail};
use imgsift::Config;
use imgsift::discovery::scan_root;
use imgsift::pipeline::WorkerPool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How often batch mode checks whether the queue has drained
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Run every matching file under `dir` through the pipeline, then exit
///
/// Fails if any file ended in an error.
pub fn cmd_batch(config: Config, dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        bail!("Batch directory does not exist: {}", dir.display());
    }

    let pipeline = build_pipeline(&config)?;
    let queue = pipeline.queue().clone();

    let found = scan_root(dir, &scan_filter(&config)?);
    let queued = found.into_iter().filter(|p| queue.offer(p.clone())).count();
    println!("Found {} images in {}", queued, dir.display());

    let workers = WorkerPool::start(pipeline.clone(), config.worker_count())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let completed = runtime.block_on(async {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let mut poll = tokio::time::interval(IDLE_POLL);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal; stopping batch");
                    return false;
                }
                _ = poll.tick() => {
                    if queue.is_idle() {
                        return true;
                    }
                }
            }
        }
    });

    workers.shutdown(config.drain_timeout());

    if let Ok(total) = pipeline.store().total_records() {
        pipeline.stats().set_total_records(total);
    }
    let summary = pipeline.stats().snapshot();

    println!();
    println!("Batch summary for {}:", dir.display());
    println!("  Converted:   {}", summary.processed);
    println!("  Duplicates:  {}", summary.duplicates);
    println!("  Errors:      {}", summary.errors);
    if summary.errors > 0 {
        println!(
            "    read {}, not ready {}, store {}, conversion {}",
            summary.read_errors,
            summary.not_ready_errors,
            summary.store_errors,
            summary.conversion_errors
        );
    }
    if summary.interrupted > 0 {
        println!("  Interrupted: {}", summary.interrupted);
    }
    println!("  Records:     {}", summary.total_records);

    if !completed {
        bail!("Batch interrupted before all files were processed");
    }
    if summary.errors > 0 {
        bail!("{} of {} files failed", summary.errors, queued);
    }
    Ok(())
}
