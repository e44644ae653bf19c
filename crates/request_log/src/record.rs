use serde_json::Value;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

/// Placeholder used for absent method and provenance fields.
pub const UNKNOWN: &str = "Unknown";

pub(crate) const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One request, decoded from a single log line.
///
/// Records are values: they are built by the codec, hashed, and then either stored or dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Always UTC, whole seconds.
    pub timestamp: OffsetDateTime,
    pub method: String,
    pub url: String,
    pub remote_ip: String,
    pub request_params: Value,
    pub app_name: String,
    pub view: String,
    pub class_name: String,
    pub function_name: String,
    pub line_number: String,
    /// Normalized identity text (e.g. an email); `None` for anonymous requests.
    pub user: Option<String>,
}

impl LogRecord {
    /// Canonical `YYYY-MM-DD HH:MM:SS` rendering of the timestamp, without a zone suffix.
    pub fn timestamp_text(&self) -> String {
        format_timestamp(self.timestamp)
    }
}

pub(crate) fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

/// Parses `YYYY-MM-DD HH:MM:SS` with an optional trailing ` UTC`, as UTC.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix(" UTC").unwrap_or(trimmed);
    PrimitiveDateTime::parse(trimmed, TIMESTAMP_FORMAT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn accepts_plain_and_utc_suffixed_timestamps() {
        let expected = datetime!(2024-03-05 14:07:09 UTC);
        assert_eq!(parse_timestamp("2024-03-05 14:07:09"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:07:09 UTC"), Some(expected));
    }

    #[test]
    fn rejects_malformed_timestamps() {
        assert_eq!(parse_timestamp("2024-03-05T14:07:09Z"), None);
        assert_eq!(parse_timestamp("2024-13-05 14:07:09"), None);
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp("2024-03-05 14:07:09 CET"), None);
    }

    #[test]
    fn canonical_text_drops_the_zone() {
        assert_eq!(
            format_timestamp(datetime!(2024-03-05 04:07:09 UTC)),
            "2024-03-05 04:07:09"
        );
    }
}
