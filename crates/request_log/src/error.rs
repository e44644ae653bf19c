use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a line that failed to decode.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ParseErrorCode {
    Format,
    Syntax,
    Validation,
    Timestamp,
}

/// Why a single log line could not be turned into a [`crate::LogRecord`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("no payload found: line has no `{{` delimiter")]
    Format,
    #[error("payload is not a literal mapping: {message} (at byte {offset})")]
    Syntax { message: String, offset: usize },
    #[error("payload is missing required fields: {}", missing.join(", "))]
    Validation { missing: Vec<&'static str> },
    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("invalid timestamp `{value}`")]
    Timestamp { value: String },
}

impl ParseError {
    pub fn code(&self) -> ParseErrorCode {
        match self {
            ParseError::Format => ParseErrorCode::Format,
            ParseError::Syntax { .. } => ParseErrorCode::Syntax,
            ParseError::Validation { .. } | ParseError::InvalidField { .. } => {
                ParseErrorCode::Validation
            }
            ParseError::Timestamp { .. } => ParseErrorCode::Timestamp,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LineRecordError {
    #[error("I/O error while reading log file ({kind:?})")]
    Io { kind: std::io::ErrorKind },
    #[error("invalid UTF-8 in log line")]
    InvalidUtf8,
    #[error("line too long (observed_bytes={observed_bytes}, max_line_bytes={max_line_bytes})")]
    LineTooLong {
        observed_bytes: usize,
        max_line_bytes: usize,
    },
    #[error("parse failure ({code:?}): {summary}")]
    Parse {
        code: ParseErrorCode,
        summary: String,
    },
}

#[derive(Debug, Clone)]
pub struct LineRecord<T> {
    pub line_number: usize,
    /// False when the line ended at EOF without a newline, e.g. mid-append by the producer.
    pub terminated: bool,
    /// The offending line, captured only for failures and only within the raw capture budget.
    pub captured_raw: Option<String>,
    pub outcome: Result<T, LineRecordError>,
}

/// Failures of the persistence layer other than uniqueness conflicts.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("remote_ip `{0}` is not an IP address")]
    InvalidRemoteIp(String),
    #[error("request params could not be converted to JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("stored row is corrupt: {0}")]
    Corrupt(String),
}

/// Run-level failures. Per-line problems never surface here.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open log file `{path}`: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error ({kind:?}) while reading log file `{path}` at line {line_number}")]
    Read {
        path: PathBuf,
        line_number: usize,
        kind: std::io::ErrorKind,
    },
}
