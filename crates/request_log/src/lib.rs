#![forbid(unsafe_code)]
//! Periodic ingestion of request log lines into a deduplicated store.
//!
//! A request middleware appends one line per request to a shared log file. This crate turns those
//! lines back into structured records and stores each request once:
//! - [`codec`] decodes a line (prefix + literal mapping) into a [`LogRecord`] without evaluating it.
//! - [`dedup`] derives the content hash that makes re-reading a file harmless.
//! - [`store`] persists records with uniqueness on the hash and on `(timestamp, url, user)`.
//! - [`IngestionRun`] reads a snapshot of the file through a bounded line reader.
//! - [`Scheduler`] fires runs on a [`ScheduleSpec`] cadence without ever overlapping them.
//!
//! Nothing here installs a global `tracing` subscriber; that is the binary's job.

pub mod codec;
mod config;
pub mod dedup;
mod error;
mod ingest;
mod line_parser;
mod reader;
mod record;
mod run;
pub mod schedule;
mod scheduler;
pub mod store;
mod writer;

pub use codec::{parse_line, render_line, LogLineCodec};
pub use config::{CaptureRaw, IngestConfig, IngestLimits};
pub use dedup::{content_hash, HashedRecord};
pub use error::{
    IngestError, LineRecord, LineRecordError, ParseError, ParseErrorCode, StoreError,
};
pub use ingest::{LineIngestor, RawCaptureBudget};
pub use line_parser::{ClassifiedParserError, LineInput, LineParser};
pub use record::{parse_timestamp, LogRecord, UNKNOWN};
pub use run::{IngestionRun, RunSummary};
pub use schedule::{
    next_fire, Cadence, CadenceKind, ScheduleError, ScheduleSettings, ScheduleSpec, MAX_INTERVAL,
    MIN_INTERVAL, SCHEDULE_SETTINGS,
};
pub use scheduler::{IngestJob, Scheduler, SchedulerState, SchedulerStats};
pub use store::{InsertOutcome, RecordStore, SqliteRecordStore, StoredRecord};
pub use writer::LogLineWriter;
