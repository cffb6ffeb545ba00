// Download-log ingestion orchestrator
//
// One file maps to one output target and one sink. A file's pipeline runs
// synchronously on tokio's blocking pool; files run concurrently through
// buffer_unordered. Failures stay with the file they happened in and are
// reported in its outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use fds_common::{FdsError, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::reader::{LogFileReader, StreamFailure, StreamStats};
use crate::sink::{open_sink, BatchSink, SinkFormat};
use crate::validator::RowValidator;

/// One unit of work: a log file and the target its records go to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl FileJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// Result of streaming one file into a sink
#[derive(Debug)]
pub struct FileIngest {
    /// True when any write or the final flush persisted rows
    pub data_written: bool,
    pub rows_written: u64,
    pub stats: StreamStats,
    pub stream_failure: Option<StreamFailure>,
}

/// Per-file report of a run
#[derive(Debug, Clone, Serialize)]
pub struct IngestionOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Every line was read and the sink finalized without error
    pub file_processed: bool,
    pub data_written: bool,
    pub rows_written: u64,
    pub stats: StreamStats,
    /// Read failure contained by the stream (corrupt or truncated archive)
    pub stream_failure: Option<String>,
    /// Failure that escaped the file's pipeline (missing input, sink error)
    pub error: Option<String>,
    pub duration_seconds: f64,
}

impl IngestionOutcome {
    fn failed(job: &FileJob, error: impl Into<String>, started: Instant) -> Self {
        Self {
            input: job.input.clone(),
            output: job.output.clone(),
            file_processed: false,
            data_written: false,
            rows_written: 0,
            stats: StreamStats::default(),
            stream_failure: None,
            error: Some(error.into()),
            duration_seconds: started.elapsed().as_secs_f64(),
        }
    }
}

/// Aggregate report of a multi-file run, in job order
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<IngestionOutcome>,
}

impl RunSummary {
    /// True when at least one file persisted data
    pub fn data_written(&self) -> bool {
        self.outcomes.iter().any(|o| o.data_written)
    }

    /// Outcomes with a failure that escaped the file's pipeline
    pub fn failed(&self) -> impl Iterator<Item = &IngestionOutcome> {
        self.outcomes.iter().filter(|o| o.error.is_some())
    }

    /// Outcomes whose stream ended on a read failure
    pub fn skipped(&self) -> impl Iterator<Item = &IngestionOutcome> {
        self.outcomes.iter().filter(|o| o.stream_failure.is_some())
    }

    pub fn rows_written(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_written).sum()
    }
}

/// Stream `input` in batches into `sink`, then finalize the sink.
///
/// The sink is finalized even when the stream ended on a read failure, so
/// batches already written stay persisted. A failed write still gets a
/// finalize attempt before the write error is returned.
pub fn ingest_into(
    input: &Path,
    validator: Arc<RowValidator>,
    batch_size: usize,
    sink: &mut dyn BatchSink,
) -> Result<FileIngest> {
    let reader = LogFileReader::new(input, validator);
    let mut batches = reader.batches(batch_size);
    let mut data_written = false;

    for batch in batches.by_ref() {
        if batch.is_empty() {
            continue;
        }
        debug!(file = %input.display(), records = batch.len(), "Writing batch");
        match sink.write_batch(batch) {
            Ok(wrote) => data_written |= wrote,
            Err(e) => {
                if let Err(close_err) = sink.finalize() {
                    warn!(
                        file = %input.display(),
                        error = %close_err,
                        "Sink could not be closed after a failed write"
                    );
                }
                return Err(e);
            },
        }
    }
    data_written |= sink.finalize()?;

    Ok(FileIngest {
        data_written,
        rows_written: sink.rows_written(),
        stats: batches.stats(),
        stream_failure: batches.take_failure(),
    })
}

/// Run the full pipeline for one file with its own validator and sink
pub fn process_log_file(
    job: &FileJob,
    config: Arc<IngestConfig>,
    format: SinkFormat,
) -> IngestionOutcome {
    let started = Instant::now();

    if !job.input.is_file() {
        let err = FdsError::InputNotFound(job.input.clone());
        error!(file = %job.input.display(), error = %err, "Cannot ingest file");
        return IngestionOutcome::failed(job, err.to_string(), started);
    }

    let batch_size = config.batch_size();
    let validator = Arc::new(RowValidator::new(config));
    let mut sink = open_sink(format, &job.output, batch_size);

    match ingest_into(&job.input, validator, batch_size, sink.as_mut()) {
        Ok(ingest) => {
            if ingest.data_written {
                info!(
                    file = %job.input.display(),
                    rows = ingest.rows_written,
                    "{} file written to {}",
                    format,
                    job.output.display()
                );
            } else {
                info!(file = %job.input.display(), "No data found to write");
            }
            if ingest.stats.rejected() > 0 {
                debug!(
                    file = %job.input.display(),
                    wrong_field_count = ingest.stats.wrong_field_count,
                    irrelevant = ingest.stats.irrelevant,
                    bad_timestamp = ingest.stats.bad_timestamp,
                    "Rows rejected"
                );
            }

            IngestionOutcome {
                input: job.input.clone(),
                output: job.output.clone(),
                file_processed: ingest.stream_failure.is_none(),
                data_written: ingest.data_written,
                rows_written: ingest.rows_written,
                stats: ingest.stats,
                stream_failure: ingest.stream_failure.map(|f| f.to_string()),
                error: None,
                duration_seconds: started.elapsed().as_secs_f64(),
            }
        },
        Err(e) => {
            error!(
                file = %job.input.display(),
                output = %job.output.display(),
                error = %e,
                "Ingestion failed"
            );
            let mut outcome = IngestionOutcome::failed(job, e.to_string(), started);
            outcome.rows_written = sink.rows_written();
            outcome.data_written = outcome.rows_written > 0;
            outcome
        },
    }
}

/// Process many files concurrently, at most `max_concurrent` at a time
pub async fn run_ingestion(
    jobs: Vec<FileJob>,
    config: Arc<IngestConfig>,
    format: SinkFormat,
    max_concurrent: usize,
) -> RunSummary {
    let concurrency = max_concurrent.max(1);
    let total = jobs.len();
    let started = Instant::now();

    info!(
        "Processing {} files in parallel (concurrency={})",
        total, concurrency
    );

    let mut indexed: Vec<(usize, IngestionOutcome)> = stream::iter(jobs.into_iter().enumerate())
        .map(|(index, job)| {
            let config = Arc::clone(&config);
            async move {
                debug!("Starting file {} ({} / {})", job.input.display(), index + 1, total);

                let task_job = job.clone();
                let task_started = Instant::now();
                let outcome = match tokio::task::spawn_blocking(move || {
                    process_log_file(&task_job, config, format)
                })
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(
                            "Ingestion task for {} ({} / {}) aborted: {}",
                            job.input.display(),
                            index + 1,
                            total,
                            e
                        );
                        IngestionOutcome::failed(
                            &job,
                            format!("ingestion task aborted: {e}"),
                            task_started,
                        )
                    },
                };
                (index, outcome)
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    indexed.sort_by_key(|(index, _)| *index);
    let summary = RunSummary {
        outcomes: indexed.into_iter().map(|(_, outcome)| outcome).collect(),
    };

    let failed = summary.failed().count();
    let skipped = summary.skipped().count();
    if failed > 0 || skipped > 0 {
        warn!(
            failed,
            skipped,
            "{} / {} files had problems",
            failed + skipped,
            total
        );
    }
    info!(
        "Ingestion complete: {} rows from {} files in {:.2}s",
        summary.rows_written(),
        total,
        started.elapsed().as_secs_f64()
    );

    summary
}

/// Output path for `input` inside `output_dir`.
///
/// `.tsv.gz` or `.gz` is stripped from the file name and the sink's
/// extension appended.
pub fn output_path_for(input: &Path, output_dir: &Path, format: SinkFormat) -> PathBuf {
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let stem = name
        .strip_suffix(".tsv.gz")
        .or_else(|| name.strip_suffix(".gz"))
        .unwrap_or(&name);

    output_dir.join(format!("{stem}.{}", format.extension()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn test_output_path_strips_archive_suffixes() {
        let dir = Path::new("/out");
        assert_eq!(
            output_path_for(Path::new("/logs/2024-09-14.tsv.gz"), dir, SinkFormat::Parquet),
            PathBuf::from("/out/2024-09-14.parquet")
        );
        assert_eq!(
            output_path_for(Path::new("day.log.gz"), dir, SinkFormat::Jsonl),
            PathBuf::from("/out/day.log.jsonl")
        );
        assert_eq!(
            output_path_for(Path::new("plain.tsv"), dir, SinkFormat::Parquet),
            PathBuf::from("/out/plain.tsv.parquet")
        );
    }

    #[test]
    fn test_missing_input_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = IngestConfig::new(["/pride"], ["complete"], [r"PXD\d{6}"], 10).unwrap();
        let job = FileJob::new(dir.path().join("absent.tsv.gz"), dir.path().join("a.parquet"));

        let outcome = process_log_file(&job, Arc::new(config), SinkFormat::Parquet);
        assert!(outcome.error.unwrap().contains("absent.tsv.gz"));
        assert!(!outcome.file_processed);
        assert!(!outcome.data_written);
        assert!(!job.output.exists());
    }

    #[test]
    fn test_summary_flags() {
        let ok = IngestionOutcome {
            input: "a".into(),
            output: "a.parquet".into(),
            file_processed: true,
            data_written: true,
            rows_written: 3,
            stats: StreamStats::default(),
            stream_failure: None,
            error: None,
            duration_seconds: 0.0,
        };
        let broken = IngestionOutcome {
            file_processed: false,
            data_written: false,
            rows_written: 0,
            stream_failure: Some("truncated".into()),
            ..ok.clone()
        };
        let summary = RunSummary {
            outcomes: vec![ok, broken],
        };
        assert!(summary.data_written());
        assert_eq!(summary.failed().count(), 0);
        assert_eq!(summary.skipped().count(), 1);
        assert_eq!(summary.rows_written(), 3);
        assert!(summary.outcomes[0].file_processed);
        assert!(!summary.outcomes[1].file_processed);
    }

    /// Accepts one batch, then refuses every write
    #[derive(Default)]
    struct BrokenAfterFirstWrite {
        writes: usize,
        finalize_calls: usize,
    }

    impl BatchSink for BrokenAfterFirstWrite {
        fn write_batch(&mut self, _batch: crate::models::Batch) -> Result<bool> {
            self.writes += 1;
            if self.writes > 1 {
                return Err(FdsError::sink("disk full"));
            }
            Ok(true)
        }

        fn finalize(&mut self) -> Result<bool> {
            self.finalize_calls += 1;
            Ok(false)
        }

        fn rows_written(&self) -> u64 {
            1
        }
    }

    fn gz_log(dir: &tempfile::TempDir, name: &str, accessions: &[&str]) -> PathBuf {
        use std::io::Write;
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        for accession in accessions {
            let path = format!("/pride/data/archive/2024/09/{accession}/f.raw");
            let fields = [
                "2024-09-14T07:14:07.419698061Z", "u", "-", &path, "-", "-", "complete", "GB", "-",
                "-", "-", "ftp", "-",
            ];
            writeln!(encoder, "{}", fields.join("\t")).unwrap();
        }
        let path = dir.path().join(name);
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();
        path
    }

    #[test]
    fn test_failed_write_still_finalizes_sink() {
        let dir = tempfile::tempdir().unwrap();
        let input = gz_log(&dir, "day.tsv.gz", &["PXD000001", "PXD000002", "PXD000003"]);
        let config = IngestConfig::new(["/pride"], ["complete"], [r"PXD\d{6}"], 1).unwrap();
        let validator = Arc::new(RowValidator::new(Arc::new(config)));
        let mut sink = BrokenAfterFirstWrite::default();

        let result = ingest_into(&input, validator, 1, &mut sink);

        assert!(matches!(result, Err(FdsError::Sink(_))));
        assert_eq!(sink.writes, 2);
        assert_eq!(sink.finalize_calls, 1);
    }

    #[test]
    fn test_unwritable_output_is_reported_not_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let input = gz_log(&dir, "day.tsv.gz", &["PXD000001", "PXD000002"]);
        // a directory where the output file should go
        let output = dir.path().join("day.parquet");
        std::fs::create_dir(&output).unwrap();
        let config = IngestConfig::new(["/pride"], ["complete"], [r"PXD\d{6}"], 1).unwrap();

        let outcome = process_log_file(
            &FileJob::new(&input, &output),
            Arc::new(config),
            SinkFormat::Parquet,
        );

        assert!(outcome.error.is_some());
        assert!(!outcome.file_processed);
        assert!(!outcome.data_written);
        assert_eq!(outcome.rows_written, 0);
        assert!(output.is_dir());
    }

    #[test]
    fn test_empty_file_finalizes_sink_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.tsv.gz");
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let config = IngestConfig::new(["/pride"], ["complete"], [r"PXD\d{6}"], 10).unwrap();
        let validator = Arc::new(RowValidator::new(Arc::new(config)));
        let mut sink = MemorySink::new();

        let ingest = ingest_into(&path, validator, 10, &mut sink).unwrap();
        assert!(!ingest.data_written);
        assert!(ingest.stream_failure.is_none());
        assert_eq!(sink.finalize_calls(), 1);
    }
}
