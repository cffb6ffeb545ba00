//! Gzipped log streaming and batching
//!
//! [`LogFileReader::batches`] yields fixed-size batches of parsed records,
//! reading the file strictly in order. Row problems are counted and skipped.
//! File problems (cannot open, corrupt or truncated archive, invalid UTF-8)
//! end that file's stream: batches already yielded stay yielded, the
//! half-filled batch is dropped, and the failure is kept on the stream for
//! the caller to inspect.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use serde::Serialize;
use tracing::{debug, error};

use crate::models::{Batch, RowRejection};
use crate::validator::RowValidator;

const READ_BUFFER_BYTES: usize = 256 * 1024;

/// Why a file's stream ended early
#[derive(Debug, thiserror::Error)]
pub enum StreamFailure {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed reading {} at line {line}: {source}", path.display())]
    Decompression {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid UTF-8 in {} at line {line}: {source}", path.display())]
    InvalidText {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::str::Utf8Error,
    },
}

/// Per-file line accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamStats {
    pub lines_read: usize,
    pub records: usize,
    pub batches: usize,
    pub wrong_field_count: usize,
    pub irrelevant: usize,
    pub bad_timestamp: usize,
}

impl StreamStats {
    fn record_rejection(&mut self, rejection: &RowRejection) {
        match rejection {
            RowRejection::FieldCount { .. } => self.wrong_field_count += 1,
            RowRejection::Irrelevant(_) => self.irrelevant += 1,
            RowRejection::BadTimestamp { .. } => self.bad_timestamp += 1,
        }
    }

    pub fn rejected(&self) -> usize {
        self.wrong_field_count + self.irrelevant + self.bad_timestamp
    }
}

/// Reader for one gzip-compressed, tab-separated download log
#[derive(Debug, Clone)]
pub struct LogFileReader {
    path: PathBuf,
    validator: Arc<RowValidator>,
}

impl LogFileReader {
    pub fn new(path: impl Into<PathBuf>, validator: Arc<RowValidator>) -> Self {
        Self {
            path: path.into(),
            validator,
        }
    }

    /// Lazily stream batches of at most `batch_size` records.
    ///
    /// Every call starts again from the beginning of the file. A zero
    /// `batch_size` is treated as 1.
    pub fn batches(&self, batch_size: usize) -> BatchStream {
        let batch_size = batch_size.max(1);
        BatchStream {
            path: self.path.clone(),
            validator: Arc::clone(&self.validator),
            batch_size,
            state: StreamState::Pending,
            buf: Vec::new(),
            batch: Vec::with_capacity(batch_size),
            stats: StreamStats::default(),
            failure: None,
        }
    }
}

enum StreamState {
    Pending,
    Reading(Box<dyn BufRead + Send>),
    Finished,
}

/// Iterator over the batches of one file
pub struct BatchStream {
    path: PathBuf,
    validator: Arc<RowValidator>,
    batch_size: usize,
    state: StreamState,
    /// Raw bytes of the current line, kept for diagnostics on failure
    buf: Vec<u8>,
    batch: Batch,
    stats: StreamStats,
    failure: Option<StreamFailure>,
}

impl BatchStream {
    /// Failure that ended the stream, if any
    pub fn failure(&self) -> Option<&StreamFailure> {
        self.failure.as_ref()
    }

    pub fn take_failure(&mut self) -> Option<StreamFailure> {
        self.failure.take()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, StreamState::Finished)
    }

    fn open(path: &Path) -> std::io::Result<Box<dyn BufRead + Send>> {
        let file = File::open(path)?;
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_BYTES, decoder)))
    }

    fn take_batch(&mut self) -> Batch {
        self.stats.batches += 1;
        std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size))
    }

    fn fail(&mut self, failure: StreamFailure) {
        error!(
            file = %self.path.display(),
            error = %failure,
            line_number = self.stats.lines_read + 1,
            content = %String::from_utf8_lossy(&self.buf).trim_end(),
            discarded_records = self.batch.len(),
            "Skipping corrupted file"
        );
        self.batch.clear();
        self.failure = Some(failure);
        self.state = StreamState::Finished;
    }
}

impl Iterator for BatchStream {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if matches!(self.state, StreamState::Pending) {
            match Self::open(&self.path) {
                Ok(reader) => {
                    debug!(file = %self.path.display(), "Opened log file");
                    self.state = StreamState::Reading(reader);
                },
                Err(source) => {
                    let path = self.path.clone();
                    self.fail(StreamFailure::Open { path, source });
                    return None;
                },
            }
        }

        loop {
            let StreamState::Reading(reader) = &mut self.state else {
                return None;
            };

            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.state = StreamState::Finished;
                    debug!(
                        file = %self.path.display(),
                        lines = self.stats.lines_read,
                        records = self.stats.records,
                        rejected = self.stats.rejected(),
                        "Reached end of log file"
                    );
                    if self.batch.is_empty() {
                        return None;
                    }
                    return Some(self.take_batch());
                },
                Ok(_) => {
                    let text = match std::str::from_utf8(&self.buf) {
                        Ok(text) => text,
                        Err(source) => {
                            let path = self.path.clone();
                            let line = self.stats.lines_read + 1;
                            self.fail(StreamFailure::InvalidText { path, line, source });
                            return None;
                        },
                    };
                    self.stats.lines_read += 1;
                    match self.validator.parse_line(text, self.stats.lines_read) {
                        Ok(record) => {
                            self.stats.records += 1;
                            self.batch.push(record);
                            if self.batch.len() >= self.batch_size {
                                return Some(self.take_batch());
                            }
                        },
                        Err(rejection) => self.stats.record_rejection(&rejection),
                    }
                },
                Err(source) => {
                    let path = self.path.clone();
                    let line = self.stats.lines_read + 1;
                    self.fail(StreamFailure::Decompression { path, line, source });
                    return None;
                },
            }
        }
    }
}
