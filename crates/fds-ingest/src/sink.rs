//! Batch sinks
//!
//! A sink receives whole batches from one file's stream and persists them.
//! [`BatchSink::write_batch`] and [`BatchSink::finalize`] both report
//! whether rows actually reached storage during that call.
//!
//! File-backed sinks buffer records and flush them whenever the buffer holds
//! at least `row_group_size` records. The output file is created on the
//! first flush, so a log without relevant rows leaves no empty output behind.
//! `finalize` flushes the remainder and closes the file; calling it again
//! returns `false` and does nothing.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Builder, Int32Builder, StringBuilder, UInt32Builder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::Datelike;
use fds_common::{FdsError, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{Batch, ParsedRecord};

/// Days from 0001-01-01 to 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Destination for parsed batches
pub trait BatchSink: Send {
    /// Accept a batch; `Ok(true)` when rows were persisted by this call
    fn write_batch(&mut self, batch: Batch) -> Result<bool>;

    /// Flush whatever is buffered and close the target.
    ///
    /// `Ok(true)` when this call persisted rows. Safe to call more than once.
    fn finalize(&mut self) -> Result<bool>;

    /// Rows persisted so far
    fn rows_written(&self) -> u64;
}

/// Output format of a file-backed sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    #[default]
    Parquet,
    Jsonl,
}

impl SinkFormat {
    /// File extension for outputs of this format
    pub fn extension(self) -> &'static str {
        match self {
            SinkFormat::Parquet => "parquet",
            SinkFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for SinkFormat {
    type Err = FdsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parquet" => Ok(SinkFormat::Parquet),
            "jsonl" | "json-lines" | "ndjson" => Ok(SinkFormat::Jsonl),
            other => Err(FdsError::config(format!("unknown output format '{other}'"))),
        }
    }
}

impl std::fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Open the file-backed sink for `format` at `path`
pub fn open_sink(format: SinkFormat, path: &Path, row_group_size: usize) -> Box<dyn BatchSink> {
    match format {
        SinkFormat::Parquet => Box::new(ParquetSink::new(path, row_group_size)),
        SinkFormat::Jsonl => Box::new(JsonLinesSink::new(path, row_group_size)),
    }
}

fn create_output(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(File::create(path)?)
}

/// Arrow schema of the persisted records
pub fn record_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("year", DataType::Int32, false),
        Field::new("month", DataType::UInt32, false),
        Field::new("user", DataType::Utf8, false),
        Field::new("accession", DataType::Utf8, false),
        Field::new("filename", DataType::Utf8, false),
        Field::new("completed", DataType::Utf8, false),
        Field::new("country", DataType::Utf8, false),
        Field::new("method", DataType::Utf8, false),
    ]))
}

/// Convert records into a single Arrow record batch
pub fn to_record_batch(records: &[ParsedRecord]) -> Result<RecordBatch> {
    let mut date = Date32Builder::with_capacity(records.len());
    let mut year = Int32Builder::with_capacity(records.len());
    let mut month = UInt32Builder::with_capacity(records.len());
    let mut user = StringBuilder::new();
    let mut accession = StringBuilder::new();
    let mut filename = StringBuilder::new();
    let mut completed = StringBuilder::new();
    let mut country = StringBuilder::new();
    let mut method = StringBuilder::new();

    for r in records {
        date.append_value(r.date.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE);
        year.append_value(r.year);
        month.append_value(r.month);
        user.append_value(&r.user);
        accession.append_value(&r.accession);
        filename.append_value(&r.filename);
        completed.append_value(&r.completed);
        country.append_value(&r.country);
        method.append_value(&r.method);
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(date.finish()),
        Arc::new(year.finish()),
        Arc::new(month.finish()),
        Arc::new(user.finish()),
        Arc::new(accession.finish()),
        Arc::new(filename.finish()),
        Arc::new(completed.finish()),
        Arc::new(country.finish()),
        Arc::new(method.finish()),
    ];

    RecordBatch::try_new(record_schema(), columns)
        .map_err(|e| FdsError::sink(format!("Failed to create record batch: {e}")))
}

/// Parquet sink, one row group per flush, Snappy compressed
pub struct ParquetSink {
    path: PathBuf,
    row_group_size: usize,
    buffer: Vec<ParsedRecord>,
    writer: Option<ArrowWriter<File>>,
    rows_written: u64,
    finalized: bool,
}

impl ParquetSink {
    pub fn new(path: impl Into<PathBuf>, row_group_size: usize) -> Self {
        Self {
            path: path.into(),
            row_group_size: row_group_size.max(1),
            buffer: Vec::new(),
            writer: None,
            rows_written: 0,
            finalized: false,
        }
    }

    fn open_writer(&self) -> Result<ArrowWriter<File>> {
        let file = create_output(&self.path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        ArrowWriter::try_new(file, record_schema(), Some(props))
            .map_err(|e| FdsError::sink(format!("Failed to create Parquet writer: {e}")))
    }

    fn remove_output(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => warn!(output = %self.path.display(), "Removed unreadable Parquet output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => warn!(
                output = %self.path.display(),
                error = %e,
                "Failed to remove unreadable Parquet output"
            ),
        }
        self.rows_written = 0;
    }

    fn flush(&mut self) -> Result<bool> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        let batch = to_record_batch(&self.buffer)?;

        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.open_writer()?,
        };
        let writer = self.writer.insert(writer);
        writer
            .write(&batch)
            .map_err(|e| FdsError::sink(format!("Failed to write Parquet batch: {e}")))?;
        writer
            .flush()
            .map_err(|e| FdsError::sink(format!("Failed to flush Parquet row group: {e}")))?;

        self.rows_written += self.buffer.len() as u64;
        debug!(
            output = %self.path.display(),
            rows = self.buffer.len(),
            total = self.rows_written,
            "Flushed row group"
        );
        self.buffer.clear();
        Ok(true)
    }
}

impl BatchSink for ParquetSink {
    fn write_batch(&mut self, batch: Batch) -> Result<bool> {
        if self.finalized {
            return Err(FdsError::sink(format!(
                "{} is already finalized",
                self.path.display()
            )));
        }
        self.buffer.extend(batch);
        if self.buffer.len() >= self.row_group_size {
            return self.flush();
        }
        Ok(false)
    }

    /// Flush the remainder and write the footer.
    ///
    /// The writer is closed even when the last flush fails, so row groups
    /// written earlier stay readable. When the footer cannot be written the
    /// output file is removed rather than left unreadable.
    fn finalize(&mut self) -> Result<bool> {
        if self.finalized {
            return Ok(false);
        }
        self.finalized = true;

        let flushed = self.flush();
        self.buffer.clear();

        let closed = match self.writer.take() {
            Some(writer) => writer
                .close()
                .map(|_| ())
                .map_err(|e| FdsError::sink(format!("Failed to close Parquet writer: {e}"))),
            None => Ok(()),
        };

        if let Err(e) = closed {
            self.remove_output();
            return Err(e);
        }
        flushed
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Newline-delimited JSON sink, one record per line
pub struct JsonLinesSink {
    path: PathBuf,
    row_group_size: usize,
    buffer: Vec<ParsedRecord>,
    writer: Option<BufWriter<File>>,
    rows_written: u64,
    finalized: bool,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>, row_group_size: usize) -> Self {
        Self {
            path: path.into(),
            row_group_size: row_group_size.max(1),
            buffer: Vec::new(),
            writer: None,
            rows_written: 0,
            finalized: false,
        }
    }

    fn flush(&mut self) -> Result<bool> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => BufWriter::new(create_output(&self.path)?),
        };
        let writer = self.writer.insert(writer);
        for record in &self.buffer {
            serde_json::to_writer(&mut *writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        self.rows_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(true)
    }
}

impl BatchSink for JsonLinesSink {
    fn write_batch(&mut self, batch: Batch) -> Result<bool> {
        if self.finalized {
            return Err(FdsError::sink(format!(
                "{} is already finalized",
                self.path.display()
            )));
        }
        self.buffer.extend(batch);
        if self.buffer.len() >= self.row_group_size {
            return self.flush();
        }
        Ok(false)
    }

    fn finalize(&mut self) -> Result<bool> {
        if self.finalized {
            return Ok(false);
        }
        self.finalized = true;
        let flushed = self.flush();
        self.buffer.clear();
        self.writer = None;
        flushed
    }

    fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

/// Sink that keeps every batch in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Vec<Batch>,
    finalize_calls: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls
    }
}

impl BatchSink for MemorySink {
    fn write_batch(&mut self, batch: Batch) -> Result<bool> {
        if batch.is_empty() {
            return Ok(false);
        }
        self.batches.push(batch);
        Ok(true)
    }

    fn finalize(&mut self) -> Result<bool> {
        self.finalize_calls += 1;
        Ok(false)
    }

    fn rows_written(&self) -> u64 {
        self.batches.iter().map(|b| b.len() as u64).sum()
    }
}
