pub(crate) const REQUEST_LOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    email       TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS request_logs (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp       TEXT NOT NULL,
    method          TEXT NOT NULL,
    url             TEXT NOT NULL,
    remote_ip       TEXT NOT NULL,
    request_params  TEXT,
    app_name        TEXT NOT NULL,
    view            TEXT NOT NULL,
    class_name      TEXT NOT NULL,
    function_name   TEXT NOT NULL,
    line_number     TEXT NOT NULL,
    user_id         INTEGER REFERENCES users(id) ON DELETE CASCADE,
    content_hash    TEXT NOT NULL UNIQUE CHECK (length(content_hash) = 64),
    UNIQUE (timestamp, url, user_id)
);

CREATE INDEX IF NOT EXISTS idx_request_logs_timestamp ON request_logs(timestamp);
CREATE INDEX IF NOT EXISTS idx_request_logs_user ON request_logs(user_id);
"#;
