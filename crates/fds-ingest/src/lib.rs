//! FDS Ingest Library
//!
//! Turns gzip-compressed, tab-separated file download logs into batches of
//! typed download records and persists them per input file.
//!
//! # Pipeline
//!
//! - **config**: immutable pattern registry shared by every file
//! - **validator**: row shape, relevance gate and record construction
//! - **accession**: ordered regex cascade, first match wins
//! - **reader**: lazy gzip line stream and fixed-size batching
//! - **sink**: Parquet, JSON-lines and in-memory batch sinks
//! - **orchestrator**: one pipeline per file, many files concurrently
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fds_ingest::{process_log_file, FileJob, IngestConfig, SinkFormat};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::new(
//!         ["/pride/data/archive"],
//!         ["complete"],
//!         [r"PXD\d{6}"],
//!         100_000,
//!     )?;
//!     let job = FileJob::new("logs/2024-09-14.tsv.gz", "out/2024-09-14.parquet");
//!     let outcome = process_log_file(&job, Arc::new(config), SinkFormat::Parquet);
//!     println!("rows written: {}", outcome.rows_written);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod accession;
pub mod cli;
pub mod config;
pub mod models;
pub mod orchestrator;
pub mod reader;
pub mod settings;
pub mod sink;
pub mod timestamp;
pub mod validator;

pub use accession::AccessionResolver;
pub use config::IngestConfig;
pub use models::{Batch, Irrelevance, ParsedRecord, RawRow, RowRejection};
pub use orchestrator::{
    ingest_into, output_path_for, process_log_file, run_ingestion, FileJob, IngestionOutcome,
    RunSummary,
};
pub use reader::{LogFileReader, StreamFailure, StreamStats};
pub use settings::Settings;
pub use sink::{open_sink, BatchSink, JsonLinesSink, MemorySink, ParquetSink, SinkFormat};
pub use validator::RowValidator;
