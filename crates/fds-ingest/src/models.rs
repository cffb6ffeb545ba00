//! Row, record and rejection types for download-log ingestion

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of tab-separated columns in a download-log line
pub const FIELD_COUNT: usize = 13;

/// One tab-split log line with exactly [`FIELD_COUNT`] fields.
///
/// The length is checked on construction, so the positional accessors
/// cannot go out of bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRow<'a>([&'a str; FIELD_COUNT]);

impl<'a> RawRow<'a> {
    /// Wrap already-split fields, rejecting any count other than 13
    pub fn from_fields(fields: &[&'a str]) -> Result<Self, RowRejection> {
        <[&'a str; FIELD_COUNT]>::try_from(fields)
            .map(Self)
            .map_err(|_| RowRejection::FieldCount {
                found: fields.len(),
            })
    }

    pub fn timestamp(&self) -> &'a str {
        self.0[0]
    }

    pub fn user(&self) -> &'a str {
        self.0[1]
    }

    pub fn resource_path(&self) -> &'a str {
        self.0[3]
    }

    pub fn status(&self) -> &'a str {
        self.0[6]
    }

    pub fn country(&self) -> &'a str {
        self.0[7]
    }

    pub fn method(&self) -> &'a str {
        self.0[11]
    }
}

/// A validated, typed download event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub date: NaiveDate,
    pub year: i32,
    pub month: u32,
    pub user: String,
    /// Project accession of the resource (e.g. a PXD accession)
    pub accession: String,
    /// Last segment of the resource path
    pub filename: String,
    /// Completion status, trimmed and lower-cased
    pub completed: String,
    pub country: String,
    /// Transfer method (ftp, aspera, http, ...)
    pub method: String,
}

/// Ordered group of records flushed to a sink together
pub type Batch = Vec<ParsedRecord>;

/// Why a row failed the relevance gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Irrelevance {
    #[error("resource path contains no '/'")]
    NoPathSeparator,

    #[error("resource path does not start with a configured identifier")]
    UnknownResource,

    #[error("no accession pattern matched the resource path")]
    NoAccession,

    #[error("resource path has an empty file name")]
    EmptyFilename,

    #[error("completion status is not accepted")]
    StatusNotAccepted,
}

/// Why a row produced no record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowRejection {
    #[error("expected {FIELD_COUNT} columns but found {found}")]
    FieldCount { found: usize },

    #[error("row not relevant: {0}")]
    Irrelevant(Irrelevance),

    #[error("unparsable timestamp '{value}': {reason}")]
    BadTimestamp { value: String, reason: String },
}

impl RowRejection {
    /// Stable short code for counters and structured logs
    pub fn code(&self) -> &'static str {
        match self {
            RowRejection::FieldCount { .. } => "field_count",
            RowRejection::Irrelevant(Irrelevance::NoAccession) => "no_accession",
            RowRejection::Irrelevant(_) => "irrelevant",
            RowRejection::BadTimestamp { .. } => "bad_timestamp",
        }
    }
}

impl From<Irrelevance> for RowRejection {
    fn from(reason: Irrelevance) -> Self {
        RowRejection::Irrelevant(reason)
    }
}
