// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use imgsift::Config;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.run.config.as_deref())?;
    cli.run.apply(&mut config);

    commands::init_logging(&config.logging.level);
    config.validate()?;

    match cli.command {
        Some(Commands::Init) => commands::cmd_init(&config),
        Some(Commands::Stats { pending }) => commands::cmd_stats(&config, pending),
        None => match cli.run.batch_process.clone() {
            Some(dir) => commands::cmd_batch(config, &dir),
            None => commands::cmd_watch(config),
        },
    }
}
