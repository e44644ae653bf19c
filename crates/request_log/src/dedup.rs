use sha2::{Digest, Sha256};

use crate::record::LogRecord;

/// A record bound to its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct HashedRecord {
    pub record: LogRecord,
    pub content_hash: String,
}

impl HashedRecord {
    pub fn new(record: LogRecord) -> Self {
        let content_hash = content_hash(&record);
        Self {
            record,
            content_hash,
        }
    }
}

/// SHA-256 over `(timestamp, url, user, method)`, as 64 lowercase hex characters.
///
/// Each field is written as `<byte length>:<text>;` so distinct tuples never share an encoding.
/// The timestamp is the canonical `YYYY-MM-DD HH:MM:SS` UTC text and an anonymous user is the
/// empty string.
pub fn content_hash(record: &LogRecord) -> String {
    let timestamp = record.timestamp_text();
    let user = record.user.as_deref().unwrap_or("");
    let mut hasher = Sha256::new();
    for field in [timestamp.as_str(), record.url.as_str(), user, record.method.as_str()] {
        hasher.update(field.len().to_string().as_bytes());
        hasher.update(b":");
        hasher.update(field.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}
