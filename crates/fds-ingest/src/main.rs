//! FDS Ingest - download-log ingestion tool

use std::process;

use clap::Parser;
use fds_common::logging::{init_logging, LogConfig, LogLevel};
use fds_ingest::cli::{execute, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("fds-ingest")
        .quiet_target("parquet")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().merge_env() {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {e}");
            log_config
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {e}");
            None
        },
    };

    if let Err(e) = execute(&cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        // exit skips destructors, flush the file appender first
        drop(guard);
        process::exit(1);
    }
}
