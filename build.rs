// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: config file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file (TOML)")
}

/// Common argument: record database
fn database_url_arg() -> Arg {
    Arg::new("database_url")
        .long("database-url")
        .value_name("URL")
        .help("Record database (path or sqlite://path)")
}

fn build_cli() -> Command {
    Command::new("imgsift")
        .version(env!("CARGO_PKG_VERSION"))
        .author("imgsift Contributors")
        .about("Watch folders for images, drop duplicate content, convert the rest")
        .subcommand_required(false)
        .arg(config_arg())
        .arg(database_url_arg())
        .arg(
            Arg::new("scan_path")
                .long("scan-path")
                .value_name("DIR")
                .action(ArgAction::Append)
                .help("Directory to watch (repeatable)"),
        )
        .arg(
            Arg::new("output_dir")
                .long("output-dir")
                .value_name("DIR")
                .help("Where converted files are written"),
        )
        .arg(
            Arg::new("scan_interval")
                .long("scan-interval")
                .value_name("SECS")
                .help("Seconds between full rescans"),
        )
        .arg(
            Arg::new("log_level")
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .value_name("N")
                .help("Number of conversion workers (0 = one per CPU)"),
        )
        .arg(
            Arg::new("delete_originals")
                .long("delete-originals")
                .action(ArgAction::SetTrue)
                .help("Remove originals after successful conversion"),
        )
        .arg(
            Arg::new("target_format")
                .long("target-format")
                .value_name("EXT")
                .help("Output format (webp, png, jpeg, bmp, tiff, gif)"),
        )
        .arg(
            Arg::new("batch_process")
                .long("batch-process")
                .value_name("DIR")
                .help("Process one folder and exit instead of watching"),
        )
        .arg(
            Arg::new("no_recursive")
                .long("no-recursive")
                .action(ArgAction::SetTrue)
                .help("Do not descend into subdirectories"),
        )
        .subcommand(Command::new("init").about("Create the record database and apply migrations"))
        .subcommand(
            Command::new("stats")
                .about("Show record totals and reservations that never completed")
                .arg(
                    Arg::new("pending")
                        .long("pending")
                        .default_value("20")
                        .help("How many pending reservations to list"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("imgsift.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
