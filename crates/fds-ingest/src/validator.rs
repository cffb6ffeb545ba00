//! Row validation and record construction
//!
//! A row becomes a [`ParsedRecord`] only after three stages:
//!
//! 1. **Shape**: exactly 13 tab-separated fields
//! 2. **Relevance**: path shape, identifier prefix, accession, file name and
//!    completion status, checked in that order with short-circuiting
//! 3. **Timestamp**: the normalized timestamp must parse
//!
//! Every failure is returned as a [`RowRejection`]; nothing here aborts a file.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::Datelike;
use tracing::{trace, warn};

use crate::accession::AccessionResolver;
use crate::config::{normalize_status, IngestConfig};
use crate::models::{Irrelevance, ParsedRecord, RawRow, RowRejection};
use crate::timestamp::parse_timestamp;

/// Parts of a relevant row the record is built from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelevantRow<'a> {
    pub accession: &'a str,
    pub filename: &'a str,
}

/// Replace literal two-character `\t` sequences with real tabs.
///
/// The upstream emitter writes some separators as escape text, which must be
/// undone before splitting or the column count is wrong.
pub fn unescape_tabs(line: &str) -> Cow<'_, str> {
    if line.contains("\\t") {
        Cow::Owned(line.replace("\\t", "\t"))
    } else {
        Cow::Borrowed(line)
    }
}

/// Relevance gate plus record builder, shared by every line of a file
#[derive(Debug)]
pub struct RowValidator {
    config: Arc<IngestConfig>,
    resolver: AccessionResolver,
}

impl RowValidator {
    pub fn new(config: Arc<IngestConfig>) -> Self {
        let resolver = AccessionResolver::from_config(&config);
        Self { config, resolver }
    }

    /// Run the relevance checks, returning the first one that fails
    pub fn check_relevance<'a>(&self, row: &RawRow<'a>) -> Result<RelevantRow<'a>, Irrelevance> {
        let path = row.resource_path();

        if !path.contains('/') {
            return Err(Irrelevance::NoPathSeparator);
        }
        if !self.config.matches_resource(path) {
            return Err(Irrelevance::UnknownResource);
        }
        let accession = self
            .resolver
            .resolve(path)
            .ok_or(Irrelevance::NoAccession)?;

        let filename = path.rsplit('/').next().unwrap_or_default();
        if filename.is_empty() {
            return Err(Irrelevance::EmptyFilename);
        }
        if !self.config.accepts_status(row.status()) {
            return Err(Irrelevance::StatusNotAccepted);
        }

        Ok(RelevantRow {
            accession,
            filename,
        })
    }

    pub fn is_relevant(&self, row: &RawRow<'_>) -> bool {
        self.check_relevance(row).is_ok()
    }

    /// Validate already-split fields and build a record.
    ///
    /// `line_no` is only used for diagnostics.
    pub fn parse_row(&self, fields: &[&str], line_no: usize) -> Result<ParsedRecord, RowRejection> {
        let row = RawRow::from_fields(fields).inspect_err(|_| {
            warn!(
                line = line_no,
                found = fields.len(),
                "Expected 13 columns, dropping row"
            );
        })?;

        let relevant = self.check_relevance(&row).inspect_err(|reason| {
            trace!(line = line_no, reason = %reason, "Row not relevant");
        })?;

        let parsed = parse_timestamp(row.timestamp()).map_err(|e| {
            warn!(
                line = line_no,
                timestamp = row.timestamp(),
                error = %e,
                "Unparsable timestamp, dropping row"
            );
            RowRejection::BadTimestamp {
                value: row.timestamp().to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(ParsedRecord {
            date: parsed.date(),
            year: parsed.year(),
            month: parsed.month(),
            user: row.user().trim().to_string(),
            accession: relevant.accession.to_string(),
            filename: relevant.filename.to_string(),
            completed: normalize_status(row.status()),
            country: row.country().to_string(),
            method: row.method().to_string(),
        })
    }

    /// Unescape, trim and split one raw log line, then parse it
    pub fn parse_line(&self, line: &str, line_no: usize) -> Result<ParsedRecord, RowRejection> {
        let line = unescape_tabs(line);
        let fields: Vec<&str> = line.trim().split('\t').collect();
        self.parse_row(&fields, line_no)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const PATH: &str = "/pride/data/archive/2024/09/PXD012345/file1.raw";

    fn validator() -> RowValidator {
        let config = IngestConfig::new(
            ["/pride/data/archive"],
            ["complete"],
            [r"PXD\d{6}", r"PXD\d+"],
            2,
        )
        .unwrap();
        RowValidator::new(Arc::new(config))
    }

    fn fields<'a>(ts: &'a str, path: &'a str, status: &'a str) -> Vec<&'a str> {
        vec![
            ts, " user1 ", "10.0.0.1", path, "512", "200", status, "GB", "x", "x", "x", "ftp",
            "x",
        ]
    }

    #[test]
    fn test_parse_valid_row() {
        let v = validator();
        let record = v
            .parse_row(&fields("2024-09-14T07:14:07.419698061Z", PATH, " Complete "), 1)
            .unwrap();

        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 9, 14).unwrap());
        assert_eq!(record.year, 2024);
        assert_eq!(record.month, 9);
        assert_eq!(record.user, "user1");
        assert_eq!(record.accession, "PXD012345");
        assert_eq!(record.filename, "file1.raw");
        assert_eq!(record.completed, "complete");
        assert_eq!(record.country, "GB");
        assert_eq!(record.method, "ftp");
    }

    #[test]
    fn test_wrong_field_count() {
        let v = validator();
        let mut row = fields("2024-09-14T07:14:07.419Z", PATH, "complete");
        row.pop();
        assert_eq!(v.parse_row(&row, 4), Err(RowRejection::FieldCount { found: 12 }));
    }

    #[test]
    fn test_relevance_checks_in_order() {
        let v = validator();
        let ts = "2024-09-14T07:14:07.419Z";
        let cases = [
            ("no-slash-path", "complete", Irrelevance::NoPathSeparator),
            ("/other/archive/PXD012345/f.raw", "complete", Irrelevance::UnknownResource),
            ("/pride/data/archive/2024/MSV000001/f.raw", "complete", Irrelevance::NoAccession),
            ("/pride/data/archive/2024/PXD012345/", "complete", Irrelevance::EmptyFilename),
            (PATH, "incomplete", Irrelevance::StatusNotAccepted),
            // unknown prefix wins over a bad status
            ("/other/PXD012345/f.raw", "incomplete", Irrelevance::UnknownResource),
        ];
        for (path, status, expected) in cases {
            let row = fields(ts, path, status);
            let raw = RawRow::from_fields(&row).unwrap();
            assert_eq!(v.check_relevance(&raw), Err(expected), "path {path}");
            assert!(!v.is_relevant(&raw));
            assert_eq!(v.parse_row(&row, 1), Err(RowRejection::Irrelevant(expected)));
        }
    }

    #[test]
    fn test_bad_timestamp_rejected_after_relevance() {
        let v = validator();
        let rejection = v
            .parse_row(&fields("yesterday", PATH, "complete"), 9)
            .unwrap_err();
        assert_eq!(rejection.code(), "bad_timestamp");
    }

    #[test]
    fn test_irrelevant_row_skips_timestamp_parse() {
        let v = validator();
        let rejection = v
            .parse_row(&fields("yesterday", PATH, "aborted"), 9)
            .unwrap_err();
        assert_eq!(rejection, RowRejection::Irrelevant(Irrelevance::StatusNotAccepted));
    }

    #[test]
    fn test_literal_tab_escapes_parse_like_real_tabs() {
        let v = validator();
        let real = fields("2024-09-14T07:14:07.419698061Z", PATH, "Complete").join("\t");
        let escaped = fields("2024-09-14T07:14:07.419698061Z", PATH, "Complete").join("\\t");

        assert_eq!(unescape_tabs(&escaped), real);
        assert_eq!(v.parse_line(&escaped, 1).unwrap(), v.parse_line(&real, 1).unwrap());
    }

    #[test]
    fn test_parse_line_trims_trailing_newline() {
        let v = validator();
        let line = format!(
            "{}\n",
            fields("2024-09-13T23:58:17.000Z", PATH, "complete").join("\t")
        );
        let record = v.parse_line(&line, 1).unwrap();
        assert_eq!(record.method, "ftp");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 9, 13).unwrap());
    }
}
