//! Persistence boundary for decoded records.

mod schema;
mod sqlite;

use crate::dedup::HashedRecord;
use crate::error::StoreError;

pub use sqlite::{SqliteRecordStore, StoredRecord};

/// Result of an insert attempt that did not fail.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with the same content hash or natural key `(timestamp, url, user)` exists.
    AlreadyExists,
}

/// Insert-only storage with uniqueness on the content hash and on the natural key.
///
/// Implementations must treat a uniqueness conflict as [`InsertOutcome::AlreadyExists`], never
/// as an error, so re-reading a file is harmless. Records are never updated.
pub trait RecordStore: Send + Sync {
    fn insert_if_absent(&self, record: &HashedRecord) -> Result<InsertOutcome, StoreError>;
}
