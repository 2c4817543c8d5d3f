// src/commands/store.rs
//! Record store maintenance commands

use super::open_store;
use anyhow::Result;
use imgsift::Config;
use tracing::info;

/// Create the database and apply migrations
pub fn cmd_init(config: &Config) -> Result<()> {
    let path = config.database_path();
    info!("Initializing record store at: {}", path.display());
    imgsift::db::init(&path)?;
    println!("Database initialized successfully at: {}", path.display());
    Ok(())
}

/// Print totals and the oldest pending reservations
pub fn cmd_stats(config: &Config, pending_limit: usize) -> Result<()> {
    let store = open_store(config, 1)?;
    let stats = store.statistics()?;

    println!("Record store: {}", config.database_path().display());
    println!("  Total records:   {}", stats.total);
    println!("  Processed:       {}", stats.processed);
    println!("  Pending:         {}", stats.pending);
    println!("  Bytes ingested:  {}", stats.total_bytes);

    if stats.pending > 0 && pending_limit > 0 {
        println!();
        println!("Reserved but never converted (later copies are treated as duplicates):");
        for record in store.list_pending(pending_limit)? {
            println!(
                "  {}  {}  (since {})",
                &record.fingerprint[..record.fingerprint.len().min(16)],
                record.source_path,
                record.discovered_at
            );
        }
    }

    Ok(())
}
