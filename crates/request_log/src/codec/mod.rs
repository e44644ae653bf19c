//! Decoding of request log lines into [`LogRecord`]s.
//!
//! A line is a free-form prefix followed by a literal mapping that starts at the first `{`.
//! The mapping is whatever the request middleware's default stringification produced, so it is
//! treated as semi-trusted text: parsed by a narrow literal parser, never evaluated.

mod literal;
mod render;
mod repr;

use serde_json::{Map, Value};

use crate::error::{ParseError, ParseErrorCode};
use crate::line_parser::{ClassifiedParserError, LineInput, LineParser};
use crate::record::{parse_timestamp, LogRecord, UNKNOWN};

pub use render::render_line;

/// Keys every payload must carry, in producer order.
pub const REQUIRED_FIELDS: [&str; 10] = [
    "timestamp",
    "url",
    "method",
    "user",
    "remote_ip",
    "app_name",
    "view",
    "class_name",
    "function_name",
    "line_number",
];

/// Stateless codec for the request middleware's line format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineCodec;

impl LogLineCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, raw_line: &str) -> Result<LogRecord, ParseError> {
        parse_line(raw_line)
    }
}

impl LineParser for LogLineCodec {
    type Event = LogRecord;
    type Error = ParseError;

    fn parse_line(&mut self, input: LineInput<'_>) -> Result<Option<Self::Event>, Self::Error> {
        if input.line.chars().all(|ch| ch.is_whitespace()) {
            return Ok(None);
        }
        self.decode(input.line).map(Some)
    }
}

impl ClassifiedParserError for ParseError {
    fn code(&self) -> ParseErrorCode {
        ParseError::code(self)
    }

    fn redacted_summary(&self) -> String {
        self.to_string()
    }
}

/// Parses one raw log line.
pub fn parse_line(raw_line: &str) -> Result<LogRecord, ParseError> {
    let line = raw_line.trim_end_matches(&['\r', '\n'][..]);
    let start = line.find('{').ok_or(ParseError::Format)?;
    let fields = literal::parse_mapping(&line[start..])?;

    let missing: Vec<&'static str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|key| !fields.contains_key(*key))
        .collect();
    if !missing.is_empty() {
        return Err(ParseError::Validation { missing });
    }

    let timestamp = match &fields["timestamp"] {
        Value::String(raw) => {
            parse_timestamp(raw).ok_or_else(|| ParseError::Timestamp { value: raw.clone() })?
        }
        other => {
            return Err(ParseError::Timestamp {
                value: other.to_string(),
            })
        }
    };

    Ok(LogRecord {
        timestamp,
        url: required_text(&fields, "url")?,
        remote_ip: required_text(&fields, "remote_ip")?,
        method: text_or_unknown(&fields, "method"),
        app_name: text_or_unknown(&fields, "app_name"),
        view: text_or_unknown(&fields, "view"),
        class_name: text_or_unknown(&fields, "class_name"),
        function_name: text_or_unknown(&fields, "function_name"),
        line_number: text_or_unknown(&fields, "line_number"),
        user: fields.get("user").and_then(identity),
        request_params: fields.get("request_params").cloned().unwrap_or(Value::Null),
    })
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(literal::python_bool(*b).to_string()),
        other => Some(other.to_string()),
    }
}

fn required_text(fields: &Map<String, Value>, key: &'static str) -> Result<String, ParseError> {
    fields
        .get(key)
        .and_then(value_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ParseError::InvalidField {
            field: key,
            reason: "value must be non-empty text".to_string(),
        })
}

fn text_or_unknown(fields: &Map<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(value_text)
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn identity(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => repr::normalize_identity(text),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    const ALICE: &str = "2024-03-05 14:07:09,412 - request_logs - INFO - Request: {'timestamp': '2024-03-05 14:07:09 UTC', 'url': '/api/orders/', 'method': 'POST', 'user': <SimpleLazyObject: <User: alice@example.com>>, 'remote_ip': '10.0.0.7', 'app_name': 'orders', 'view': 'OrderView', 'class_name': 'OrderView', 'function_name': 'post', 'line_number': 88, 'request_params': {'qty': ['2']}}";

    fn sample() -> LogRecord {
        LogRecord {
            timestamp: datetime!(2024-03-05 14:07:09 UTC),
            method: "GET".into(),
            url: "/api/items/?q=it's".into(),
            remote_ip: "192.168.1.20".into(),
            request_params: json!({"q": ["it's"], "page": 2, "flags": [true, null]}),
            app_name: "catalog".into(),
            view: "ItemList".into(),
            class_name: "ItemList".into(),
            function_name: "get".into(),
            line_number: "41".into(),
            user: Some("bob@example.com".into()),
        }
    }

    #[test]
    fn decodes_a_producer_line() {
        let record = parse_line(ALICE).unwrap();
        assert_eq!(record.timestamp, datetime!(2024-03-05 14:07:09 UTC));
        assert_eq!(record.url, "/api/orders/");
        assert_eq!(record.method, "POST");
        assert_eq!(record.user.as_deref(), Some("alice@example.com"));
        assert_eq!(record.remote_ip, "10.0.0.7");
        assert_eq!(record.line_number, "88");
        assert_eq!(record.request_params, json!({"qty": ["2"]}));
    }

    #[test]
    fn round_trips_through_the_producer_format() {
        let record = sample();
        assert_eq!(parse_line(&render_line(&record)).unwrap(), record);

        let anonymous = LogRecord {
            user: None,
            request_params: Value::Null,
            ..sample()
        };
        assert_eq!(parse_line(&render_line(&anonymous)).unwrap(), anonymous);
    }

    #[test]
    fn line_without_payload_is_a_format_error() {
        let err = parse_line("2024-03-05 14:07:09 - Response status: 200").unwrap_err();
        assert_eq!(err, ParseError::Format);
        assert_eq!(err.code(), ParseErrorCode::Format);
    }

    #[test]
    fn truncated_payload_is_a_syntax_error() {
        let cut = &ALICE[..ALICE.len() - 20];
        let err = parse_line(cut).unwrap_err();
        assert_eq!(err.code(), ParseErrorCode::Syntax);
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = parse_line("Request: {'timestamp': '2024-03-05 14:07:09', 'url': '/x'}").unwrap_err();
        match err {
            ParseError::Validation { missing } => {
                assert_eq!(
                    missing,
                    vec![
                        "method",
                        "user",
                        "remote_ip",
                        "app_name",
                        "view",
                        "class_name",
                        "function_name",
                        "line_number"
                    ]
                );
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let line = ALICE.replace("2024-03-05 14:07:09 UTC", "05/03/2024 14:07");
        let err = parse_line(&line).unwrap_err();
        assert_eq!(
            err,
            ParseError::Timestamp {
                value: "05/03/2024 14:07".into()
            }
        );
    }

    #[test]
    fn empty_url_is_invalid() {
        let line = ALICE.replace("'/api/orders/'", "''");
        let err = parse_line(&line).unwrap_err();
        assert_eq!(err.code(), ParseErrorCode::Validation);
    }

    #[test]
    fn anonymous_user_becomes_none() {
        for user in [
            "'Anonymous'",
            "None",
            "<SimpleLazyObject: <django.contrib.auth.models.AnonymousUser object at 0x7f01>>",
            "'<SimpleLazyObject: <User: Anonymous>>'",
        ] {
            let line = ALICE.replace("<SimpleLazyObject: <User: alice@example.com>>", user);
            assert_eq!(parse_line(&line).unwrap().user, None, "user literal {user}");
        }
    }

    #[test]
    fn null_provenance_defaults_to_unknown() {
        let line = ALICE
            .replace("'POST'", "None")
            .replace("'function_name': 'post'", "'function_name': None");
        let record = parse_line(&line).unwrap();
        assert_eq!(record.method, UNKNOWN);
        assert_eq!(record.function_name, UNKNOWN);
    }

    #[test]
    fn codec_skips_blank_lines_as_line_parser() {
        let mut codec = LogLineCodec::new();
        let blank = codec.parse_line(LineInput {
            line: "   ",
            line_number: 1,
        });
        assert!(matches!(blank, Ok(None)));
    }
}
