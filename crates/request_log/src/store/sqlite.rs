use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use super::schema::REQUEST_LOG_SCHEMA;
use super::{InsertOutcome, RecordStore};
use crate::dedup::HashedRecord;
use crate::error::StoreError;
use crate::record::{format_timestamp, parse_timestamp, LogRecord};

/// A persisted row, with the identity resolved back to its email.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    pub user_id: Option<i64>,
    pub content_hash: String,
    pub record: LogRecord,
}

/// SQLite-backed record store.
///
/// The `users` table is the identity directory: a record's user text is resolved against
/// `users.email` and stored as a reference, or as `NULL` when no user matches.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open a file-backed store, creating the schema if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        // In-memory databases stay on the `memory` journal.
        if let Err(err) = conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(())) {
            debug!(error = %err, "WAL journal mode unavailable");
        }
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(REQUEST_LOG_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an identity to the directory, returning its id. Idempotent per email.
    pub fn register_identity(&self, email: &str) -> Result<i64, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO users (email) VALUES (?1) ON CONFLICT(email) DO NOTHING",
            [email],
        )?;
        let id = conn.query_row("SELECT id FROM users WHERE email = ?1", [email], |row| {
            row.get(0)
        })?;
        Ok(id)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM request_logs", [], |row| row.get(0))?;
        Ok(n.max(0) as u64)
    }

    pub fn find_by_hash(&self, content_hash: &str) -> Result<Option<StoredRecord>, StoreError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                r#"
                SELECT l.id, l.timestamp, l.method, l.url, l.remote_ip, l.request_params,
                       l.app_name, l.view, l.class_name, l.function_name, l.line_number,
                       l.user_id, u.email, l.content_hash
                FROM request_logs l LEFT JOIN users u ON u.id = l.user_id
                WHERE l.content_hash = ?1
                "#,
                [content_hash],
                |row| {
                    Ok(RawRow {
                        id: row.get(0)?,
                        timestamp: row.get(1)?,
                        method: row.get(2)?,
                        url: row.get(3)?,
                        remote_ip: row.get(4)?,
                        request_params: row.get(5)?,
                        app_name: row.get(6)?,
                        view: row.get(7)?,
                        class_name: row.get(8)?,
                        function_name: row.get(9)?,
                        line_number: row.get(10)?,
                        user_id: row.get(11)?,
                        email: row.get(12)?,
                        content_hash: row.get(13)?,
                    })
                },
            )
            .optional()?;
        row.map(RawRow::into_stored).transpose()
    }
}

fn resolve_identity(conn: &Connection, user: Option<&str>) -> Result<Option<i64>, StoreError> {
    let Some(user) = user else {
        return Ok(None);
    };
    let id = conn
        .query_row("SELECT id FROM users WHERE email = ?1", [user], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(id)
}

impl RecordStore for SqliteRecordStore {
    fn insert_if_absent(&self, hashed: &HashedRecord) -> Result<InsertOutcome, StoreError> {
        let record = &hashed.record;
        if record.remote_ip.parse::<IpAddr>().is_err() {
            return Err(StoreError::InvalidRemoteIp(record.remote_ip.clone()));
        }
        let request_params = match &record.request_params {
            Value::Null => None,
            other => Some(serde_json::to_string(other)?),
        };

        let conn = self.lock();
        let user_id = resolve_identity(&conn, record.user.as_deref())?;
        let changed = conn.execute(
            r#"
            INSERT INTO request_logs (
                timestamp, method, url, remote_ip, request_params, app_name, view,
                class_name, function_name, line_number, user_id, content_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT DO NOTHING
            "#,
            params![
                format_timestamp(record.timestamp),
                record.method,
                record.url,
                record.remote_ip,
                request_params,
                record.app_name,
                record.view,
                record.class_name,
                record.function_name,
                record.line_number,
                user_id,
                hashed.content_hash,
            ],
        )?;

        Ok(if changed == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }
}

struct RawRow {
    id: i64,
    timestamp: String,
    method: String,
    url: String,
    remote_ip: String,
    request_params: Option<String>,
    app_name: String,
    view: String,
    class_name: String,
    function_name: String,
    line_number: String,
    user_id: Option<i64>,
    email: Option<String>,
    content_hash: String,
}

impl RawRow {
    fn into_stored(self) -> Result<StoredRecord, StoreError> {
        let timestamp = parse_timestamp(&self.timestamp)
            .ok_or_else(|| StoreError::Corrupt(format!("timestamp `{}`", self.timestamp)))?;
        let request_params = match self.request_params.as_deref() {
            Some(text) => serde_json::from_str(text)?,
            None => Value::Null,
        };
        Ok(StoredRecord {
            id: self.id,
            user_id: self.user_id,
            content_hash: self.content_hash,
            record: LogRecord {
                timestamp,
                method: self.method,
                url: self.url,
                remote_ip: self.remote_ip,
                request_params,
                app_name: self.app_name,
                view: self.view,
                class_name: self.class_name,
                function_name: self.function_name,
                line_number: self.line_number,
                user: self.email,
            },
        })
    }
}
