//! Command-line interface of the `fds-ingest` binary

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::accession::AccessionResolver;
use crate::orchestrator::{output_path_for, run_ingestion, FileJob, RunSummary};
use crate::settings::Settings;
use crate::sink::SinkFormat;
use crate::validator::RowValidator;

/// FDS - file download statistics ingestion
#[derive(Parser, Debug)]
#[command(name = "fds-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse download logs into columnar output, one output file per log
    Ingest {
        /// Settings file (YAML, TOML or JSON)
        #[arg(short, long, env = "FDS_CONFIG")]
        config: PathBuf,

        /// Directory the output files are written to
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Output format, overrides the settings file
        #[arg(short, long)]
        format: Option<SinkFormat>,

        /// Records per batch, overrides the settings file
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Files processed at the same time, overrides the settings file
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Gzip-compressed log files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Validate a settings file and report accession patterns that do not compile
    CheckConfig {
        #[arg(short, long, env = "FDS_CONFIG")]
        config: PathBuf,
    },

    /// Run a single raw log line through validation and print the result
    ParseLine {
        #[arg(short, long, env = "FDS_CONFIG")]
        config: PathBuf,

        /// Raw line; literal `\t` sequences are treated as tabs
        line: String,
    },
}

/// Execute a parsed command
pub async fn execute(command: &Command) -> Result<()> {
    match command {
        Command::Ingest {
            config,
            output_dir,
            format,
            batch_size,
            jobs,
            inputs,
        } => {
            let mut settings = Settings::load(config)?;
            if let Some(format) = format {
                settings.output_format = *format;
            }
            if let Some(batch_size) = batch_size {
                settings.batch_size = *batch_size;
            }
            if let Some(jobs) = jobs {
                settings.max_concurrent_files = *jobs;
            }

            let summary = ingest(&settings, inputs, output_dir).await?;
            let failed = summary.failed().count();
            if failed > 0 {
                bail!("{} of {} files failed", failed, summary.outcomes.len());
            }
            Ok(())
        },
        Command::CheckConfig { config } => check_config(config),
        Command::ParseLine { config, line } => parse_line(config, line),
    }
}

/// Build one job per input, refusing inputs that would share an output
pub fn plan_jobs(
    inputs: &[PathBuf],
    output_dir: &std::path::Path,
    format: SinkFormat,
) -> Result<Vec<FileJob>> {
    let mut seen = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let output = output_path_for(input, output_dir, format);
            if !seen.insert(output.clone()) {
                bail!(
                    "{} would overwrite output {} of an earlier input",
                    input.display(),
                    output.display()
                );
            }
            Ok(FileJob::new(input.clone(), output))
        })
        .collect()
}

/// Run the pipeline over `inputs` with the given settings
pub async fn ingest(
    settings: &Settings,
    inputs: &[PathBuf],
    output_dir: &std::path::Path,
) -> Result<RunSummary> {
    let config = Arc::new(settings.ingest_config()?);

    let resolver = AccessionResolver::from_config(&config);
    for (pattern, error) in resolver.invalid_patterns() {
        warn!(pattern, error = %error, "Accession pattern will be skipped");
    }

    let jobs = plan_jobs(inputs, output_dir, settings.output_format)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    info!(
        files = jobs.len(),
        batch_size = config.batch_size(),
        format = %settings.output_format,
        "Starting ingestion"
    );

    Ok(run_ingestion(
        jobs,
        config,
        settings.output_format,
        settings.max_concurrent_files,
    )
    .await)
}

fn check_config(path: &std::path::Path) -> Result<()> {
    let settings = Settings::load(path)?;
    let config = settings.ingest_config()?;
    let resolver = AccessionResolver::from_config(&config);
    let invalid = resolver.invalid_patterns();

    println!("Settings: {}", path.display());
    println!("  resource identifiers: {}", config.resource_identifiers().len());
    println!("  completeness values:  {}", config.completeness().len());
    println!(
        "  accession patterns:   {} ({} invalid)",
        resolver.len(),
        invalid.len()
    );
    println!("  batch size:           {}", config.batch_size());
    println!("  concurrent files:     {}", settings.max_concurrent_files);
    println!("  output format:        {}", settings.output_format);

    for (pattern, error) in &invalid {
        println!("  skipped pattern {pattern}: {error}");
    }
    Ok(())
}

fn parse_line(path: &std::path::Path, line: &str) -> Result<()> {
    let settings = Settings::load(path)?;
    let validator = RowValidator::new(Arc::new(settings.ingest_config()?));

    match validator.parse_line(line, 1) {
        Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        Err(rejection) => println!("rejected ({}): {rejection}", rejection.code()),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ingest_arguments() {
        let cli = Cli::try_parse_from([
            "fds-ingest",
            "ingest",
            "--config",
            "fds.yaml",
            "--output-dir",
            "out",
            "--format",
            "jsonl",
            "-j",
            "2",
            "a.tsv.gz",
            "b.tsv.gz",
        ])
        .unwrap();

        match cli.command {
            Command::Ingest {
                format,
                jobs,
                inputs,
                batch_size,
                ..
            } => {
                assert_eq!(format, Some(SinkFormat::Jsonl));
                assert_eq!(jobs, Some(2));
                assert_eq!(batch_size, None);
                assert_eq!(inputs.len(), 2);
            },
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_ingest_requires_inputs() {
        let result = Cli::try_parse_from([
            "fds-ingest",
            "ingest",
            "--config",
            "fds.yaml",
            "--output-dir",
            "out",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_plan_jobs_rejects_colliding_outputs() {
        let out = std::path::Path::new("/out");
        let jobs = plan_jobs(
            &[PathBuf::from("/a/day1.tsv.gz"), PathBuf::from("/a/day2.tsv.gz")],
            out,
            SinkFormat::Parquet,
        )
        .unwrap();
        assert_eq!(jobs[1].output, PathBuf::from("/out/day2.parquet"));

        let collision = plan_jobs(
            &[PathBuf::from("/a/day1.tsv.gz"), PathBuf::from("/b/day1.tsv.gz")],
            out,
            SinkFormat::Parquet,
        );
        assert!(collision.is_err());
    }
}
