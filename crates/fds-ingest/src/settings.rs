//! Run settings loaded from a config file plus `FDS_*` environment overrides

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use fds_common::{FdsError, Result};
use serde::{Deserialize, Serialize};

use crate::config::IngestConfig;
use crate::sink::SinkFormat;

/// Default number of records per emitted batch
pub const DEFAULT_BATCH_SIZE: usize = 100_000;

/// Default number of files processed at the same time
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 4;

/// Prefix of environment overrides (`FDS_BATCH_SIZE`, ...)
pub const ENV_PREFIX: &str = "FDS";

/// Operator-facing ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub resource_identifiers: Vec<String>,
    #[serde(default)]
    pub completeness_values: Vec<String>,
    pub accession_patterns: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    #[serde(default)]
    pub output_format: SinkFormat,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_concurrent_files() -> usize {
    DEFAULT_MAX_CONCURRENT_FILES
}

impl Settings {
    /// Load settings from `path` (format chosen by extension), then apply
    /// `FDS_*` environment overrides. A `.env` file is honored if present.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        if !path.exists() {
            return Err(FdsError::config(format!(
                "settings file not found: {}",
                path.display()
            )));
        }

        let settings = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| FdsError::config(format!("{}: {e}", path.display())))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from an in-memory document, without environment overrides
    pub fn from_document(content: &str, format: FileFormat) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(content, format))
            .build()
            .and_then(|c| c.try_deserialize::<Settings>())
            .map_err(|e| FdsError::config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_files == 0 {
            return Err(FdsError::config("max_concurrent_files must be at least 1"));
        }
        if self.completeness_values.is_empty() {
            tracing::warn!("No completeness values configured, every row will be rejected");
        }
        Ok(())
    }

    /// Build the immutable pattern registry for a run
    pub fn ingest_config(&self) -> Result<IngestConfig> {
        IngestConfig::new(
            self.resource_identifiers.iter().cloned(),
            &self.completeness_values,
            &self.accession_patterns,
            self.batch_size,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TOML: &str = r#"
resource_identifiers = ["/pride/data/archive"]
completeness_values = ["Complete"]
accession_patterns = ["PXD\\d{6}", "PRD\\d{6}"]
"#;

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_document(TOML, FileFormat::Toml).unwrap();
        assert_eq!(settings.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(settings.max_concurrent_files, DEFAULT_MAX_CONCURRENT_FILES);
        assert_eq!(settings.output_format, SinkFormat::Parquet);
    }

    #[test]
    fn test_yaml_with_overrides() {
        let yaml = r#"
resource_identifiers:
  - /pride/data/archive
  - /pride-archive
completeness_values: [complete, incomplete]
accession_patterns:
  - 'PXD\d{6}'
batch_size: 500
max_concurrent_files: 2
output_format: jsonl
"#;
        let settings = Settings::from_document(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(settings.resource_identifiers.len(), 2);
        assert_eq!(settings.batch_size, 500);
        assert_eq!(settings.max_concurrent_files, 2);
        assert_eq!(settings.output_format, SinkFormat::Jsonl);
    }

    #[test]
    fn test_ingest_config_normalizes() {
        let config = Settings::from_document(TOML, FileFormat::Toml)
            .unwrap()
            .ingest_config()
            .unwrap();
        assert_eq!(config.accession_patterns(), [r"PXD\d{6}", r"PRD\d{6}"]);
        assert!(config.accepts_status("complete"));
    }

    #[test]
    fn test_missing_required_key_is_config_error() {
        let result = Settings::from_document("batch_size = 3", FileFormat::Toml);
        assert!(matches!(result, Err(FdsError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_fails_on_conversion() {
        let toml = format!("{TOML}\nbatch_size = 0\n");
        let settings = Settings::from_document(&toml, FileFormat::Toml).unwrap();
        assert!(settings.ingest_config().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fds.toml");
        std::fs::write(&path, TOML).unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.accession_patterns.len(), 2);

        assert!(Settings::load(&dir.path().join("missing.toml")).is_err());
    }
}
