//! Build automation tasks for FDS
//!
//! Currently generates the CLI reference from the clap definitions.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for FDS", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the fds-ingest CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<fds_ingest::cli::Cli>();

    let content = format!(
        r#"# fds-ingest CLI Reference

This documentation is auto-generated from the CLI source code. Last updated: {}.

## Overview

`fds-ingest` reads gzip-compressed, tab-separated file download logs, keeps the
rows that point at configured archive paths with an accepted completion status,
and writes one Parquet (or JSON-lines) file per input log.

## Quick Start

```bash
# Check a settings file and see which accession patterns would be skipped
fds-ingest check-config --config fds.yaml

# Try a single log line
fds-ingest parse-line --config fds.yaml $'2024-09-14T07:14:07.419698061Z\tuser1\t...'

# Ingest a day of logs, four files at a time
fds-ingest ingest --config fds.yaml --output-dir out/ --jobs 4 logs/*.tsv.gz
```

Example `fds.yaml`:

```yaml
resource_identifiers:
  - /pride/data/archive
completeness_values: [complete]
accession_patterns:
  - 'PXD\d{{6}}'
  - 'PRD\d{{6}}'
batch_size: 100000
max_concurrent_files: 4
output_format: parquet
```

## Commands

{}

## Environment Variables

- `FDS_CONFIG` - Settings file used when `--config` is omitted
- `FDS_BATCH_SIZE`, `FDS_MAX_CONCURRENT_FILES`, `FDS_OUTPUT_FORMAT` - Override settings file values
- `FDS_LOG_LEVEL`, `FDS_LOG_OUTPUT`, `FDS_LOG_FORMAT`, `FDS_LOG_DIR` - Logging configuration
- `RUST_LOG` - Extra filter directives (e.g., `fds_ingest=trace`)

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}
