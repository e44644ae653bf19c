use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::codec::render_line;
use crate::record::LogRecord;

/// Appends records to a shared log file in the format the codec reads back.
///
/// Each record is written with a single `write_all` of the full line, so concurrent appenders
/// using `O_APPEND` do not interleave within a line on local filesystems.
#[derive(Debug)]
pub struct LogLineWriter {
    path: PathBuf,
    file: File,
}

impl LogLineWriter {
    /// Opens `path` for appending, creating it and its parent directories if needed.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &LogRecord) -> io::Result<()> {
        let mut line = render_line(record);
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_line;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn appended_lines_decode_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("request_logs.log");
        let record = LogRecord {
            timestamp: datetime!(2024-07-04 12:00:00 UTC),
            method: "POST".into(),
            url: "/orders/".into(),
            remote_ip: "192.168.1.20".into(),
            request_params: json!({"qty": 2, "note": "it's fine"}),
            app_name: "shop".into(),
            view: "OrderCreate".into(),
            class_name: "OrderCreate".into(),
            function_name: "post".into(),
            line_number: "88".into(),
            user: Some("bob@example.com".into()),
        };

        let mut writer = LogLineWriter::open(&path).unwrap();
        writer.append(&record).unwrap();
        drop(writer);
        let mut writer = LogLineWriter::open(&path).unwrap();
        writer.append(&record).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            assert_eq!(parse_line(line).unwrap(), record);
        }
    }
}
