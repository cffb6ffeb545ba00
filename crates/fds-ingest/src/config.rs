//! Immutable ingestion configuration: the pattern registry
//!
//! Built once per run from operator-supplied lists and shared read-only by
//! every file pipeline. Accession patterns are normalized here but not
//! compiled: a pattern that fails to compile is skipped by the resolver on
//! its own, so one bad entry never disables the rest of the cascade.

use fds_common::{FdsError, Result};
use serde::Serialize;
use std::collections::HashSet;

/// Collapse every double backslash into a single one.
///
/// Patterns that travel through a serialization layer sometimes arrive
/// double-escaped (`PXD\\d{6}` instead of `PXD\d{6}`).
pub fn normalize_pattern(pattern: &str) -> String {
    pattern.replace(r"\\", r"\")
}

/// Lower-case and trim a completion status for set comparison
pub fn normalize_status(status: &str) -> String {
    status.trim().to_lowercase()
}

/// Validated configuration for one ingestion run
#[derive(Debug, Clone, Serialize)]
pub struct IngestConfig {
    resource_identifiers: Vec<String>,
    completeness: HashSet<String>,
    accession_patterns: Vec<String>,
    batch_size: usize,
}

impl IngestConfig {
    /// Build a configuration from raw operator lists.
    ///
    /// Fails when the identifier list or the pattern list is empty, or when
    /// `batch_size` is zero.
    pub fn new<R, C, P>(
        resource_identifiers: R,
        completeness_values: C,
        accession_patterns: P,
        batch_size: usize,
    ) -> Result<Self>
    where
        R: IntoIterator,
        R::Item: Into<String>,
        C: IntoIterator,
        C::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        let resource_identifiers: Vec<String> =
            resource_identifiers.into_iter().map(Into::into).collect();
        if resource_identifiers.is_empty() {
            return Err(FdsError::config("resource identifier list is empty"));
        }

        let accession_patterns: Vec<String> = accession_patterns
            .into_iter()
            .map(|p| normalize_pattern(p.as_ref()))
            .collect();
        if accession_patterns.is_empty() {
            return Err(FdsError::config("accession pattern list is empty"));
        }

        if batch_size == 0 {
            return Err(FdsError::config("batch size must be a positive integer"));
        }

        let completeness = completeness_values
            .into_iter()
            .map(|c| normalize_status(c.as_ref()))
            .collect();

        Ok(Self {
            resource_identifiers,
            completeness,
            accession_patterns,
            batch_size,
        })
    }

    pub fn resource_identifiers(&self) -> &[String] {
        &self.resource_identifiers
    }

    pub fn completeness(&self) -> &HashSet<String> {
        &self.completeness
    }

    /// Normalized accession patterns in precedence order
    pub fn accession_patterns(&self) -> &[String] {
        &self.accession_patterns
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// True when `path` starts with one of the configured identifiers
    pub fn matches_resource(&self, path: &str) -> bool {
        self.resource_identifiers
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// True when the trimmed, lower-cased `status` is an accepted value
    pub fn accepts_status(&self, status: &str) -> bool {
        self.completeness.contains(&normalize_status(status))
    }
}
