use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::codec::LogLineCodec;
use crate::config::IngestConfig;
use crate::dedup::HashedRecord;
use crate::error::{IngestError, LineRecordError};
use crate::ingest::LineIngestor;
use crate::store::{InsertOutcome, RecordStore};

/// Per-run counters.
///
/// `parsed` counts lines that decoded into a record; each of those ends up in exactly one of
/// `stored`, `duplicates`, or `rejected`. `skipped` counts lines that failed to decode.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize)]
pub struct RunSummary {
    pub parsed: u64,
    pub skipped: u64,
    pub duplicates: u64,
    pub stored: u64,
    pub rejected: u64,
}

impl RunSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One pass over the current contents of a log file.
///
/// Each run re-reads the file from the start and relies on the store's uniqueness guards for
/// idempotence; no read offset is kept between runs. The file is never modified.
pub struct IngestionRun {
    path: PathBuf,
    store: Arc<dyn RecordStore>,
    config: IngestConfig,
}

impl IngestionRun {
    pub fn new(path: impl Into<PathBuf>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            path: path.into(),
            store,
            config: IngestConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IngestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run(&self) -> Result<RunSummary, IngestError> {
        let span = info_span!("ingest_run", path = %self.path.display());
        let _entered = span.enter();

        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!("log file does not exist yet; nothing to ingest");
                return Ok(RunSummary::default());
            }
            Err(source) => {
                error!(error = %source, "cannot open log file");
                return Err(IngestError::FileAccess {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let snapshot_len = file.metadata().map_err(|source| {
            error!(error = %source, "cannot stat log file");
            IngestError::FileAccess {
                path: self.path.clone(),
                source,
            }
        })?;
        let snapshot_len = snapshot_len.len();
        if snapshot_len == 0 {
            info!("no new logs to process");
            return Ok(RunSummary::default());
        }

        // Bytes appended after this point belong to the next run.
        let reader = file.take(snapshot_len);
        let summary = self.ingest_lines(reader)?;
        info!(
            parsed = summary.parsed,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            stored = summary.stored,
            rejected = summary.rejected,
            "log ingestion finished"
        );
        Ok(summary)
    }

    fn ingest_lines<R: Read>(&self, reader: R) -> Result<RunSummary, IngestError> {
        let mut summary = RunSummary::default();
        let ingestor = LineIngestor::new(reader, LogLineCodec::new(), self.config.clone());

        for line in ingestor {
            let record = match line.outcome {
                Ok(record) => record,
                Err(LineRecordError::Io { kind }) => {
                    error!(line_number = line.line_number, ?kind, "log file read failed");
                    return Err(IngestError::Read {
                        path: self.path.clone(),
                        line_number: line.line_number,
                        kind,
                    });
                }
                Err(err) => {
                    summary.skipped += 1;
                    let raw = line.captured_raw.as_deref().unwrap_or("<not captured>");
                    if line.terminated {
                        warn!(line_number = line.line_number, error = %err, line = raw, "skipping malformed log line");
                    } else {
                        warn!(line_number = line.line_number, error = %err, line = raw, "skipping incomplete trailing log line");
                    }
                    continue;
                }
            };
            summary.parsed += 1;

            let hashed = HashedRecord::new(record);
            match self.store.insert_if_absent(&hashed) {
                Ok(InsertOutcome::Inserted) => {
                    summary.stored += 1;
                    debug!(
                        line_number = line.line_number,
                        timestamp = %hashed.record.timestamp_text(),
                        content_hash = %hashed.content_hash,
                        "stored log entry"
                    );
                }
                Ok(InsertOutcome::AlreadyExists) => {
                    summary.duplicates += 1;
                    debug!(
                        line_number = line.line_number,
                        content_hash = %hashed.content_hash,
                        "duplicate log entry"
                    );
                }
                Err(err) => {
                    summary.rejected += 1;
                    error!(
                        line_number = line.line_number,
                        error = %err,
                        record = ?hashed.record,
                        "failed to store log entry"
                    );
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::SqliteRecordStore;
    use std::sync::Mutex;

    const LINE_A: &str = "2024-05-01 10:00:00,001 - request_logs - INFO - Request: {'timestamp': '2024-05-01 10:00:00 UTC', 'url': '/a/', 'method': 'GET', 'user': 'Anonymous', 'remote_ip': '10.0.0.1', 'app_name': 'a', 'view': 'A', 'class_name': 'A', 'function_name': 'get', 'line_number': 1}";
    const LINE_B: &str = "2024-05-01 10:00:01,001 - request_logs - INFO - Request: {'timestamp': '2024-05-01 10:00:01 UTC', 'url': '/b/', 'method': 'GET', 'user': 'Anonymous', 'remote_ip': '10.0.0.2', 'app_name': 'b', 'view': 'B', 'class_name': 'B', 'function_name': 'get', 'line_number': 2}";

    struct FailingStore {
        calls: Mutex<u32>,
    }

    impl RecordStore for FailingStore {
        fn insert_if_absent(&self, _record: &HashedRecord) -> Result<InsertOutcome, StoreError> {
            *self.calls.lock().unwrap() += 1;
            Err(StoreError::Corrupt("disk on fire".into()))
        }
    }

    #[test]
    fn counts_each_line_outcome() {
        let store = Arc::new(SqliteRecordStore::memory().unwrap());
        let run = IngestionRun::new("unused.log", store);
        let text = format!("{LINE_A}\nno payload here\n\n{LINE_B}\n{LINE_A}\n{{'broken'");

        let summary = run.ingest_lines(text.as_bytes()).unwrap();
        assert_eq!(
            summary,
            RunSummary {
                parsed: 3,
                skipped: 2,
                duplicates: 1,
                stored: 2,
                rejected: 0,
            }
        );
    }

    #[test]
    fn store_errors_do_not_abort_the_run() {
        let store = Arc::new(FailingStore {
            calls: Mutex::new(0),
        });
        let run = IngestionRun::new("unused.log", store.clone());
        let text = format!("{LINE_A}\n{LINE_B}\n");

        let summary = run.ingest_lines(text.as_bytes()).unwrap();
        assert_eq!(summary.parsed, 2);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.stored, 0);
        assert_eq!(*store.calls.lock().unwrap(), 2);
    }

    #[test]
    fn missing_file_is_an_empty_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::memory().unwrap());
        let run = IngestionRun::new(dir.path().join("absent.log"), store);
        let summary = run.run().unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn empty_file_is_an_empty_summary() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteRecordStore::memory().unwrap());
        let run = IngestionRun::new(file.path(), store);
        assert!(run.run().unwrap().is_empty());
    }

    #[test]
    fn unreadable_path_is_a_run_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteRecordStore::memory().unwrap());
        // Opening a directory succeeds on unix but reading it fails; either way the run fails.
        let run = IngestionRun::new(dir.path(), store);
        assert!(run.run().is_err());
    }
}
