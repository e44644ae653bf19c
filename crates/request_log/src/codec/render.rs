use serde_json::Value;

use super::literal::python_bool;
use crate::record::LogRecord;

const LINE_PREFIX: &str = "request_logs - INFO - Request: ";

/// Renders `record` the way the request middleware writes it: a logging prefix followed by a
/// literal mapping with single-quoted strings and the identity as a wrapper repr.
pub fn render_line(record: &LogRecord) -> String {
    let timestamp = record.timestamp_text();
    let mut out = format!("{timestamp},000 - {LINE_PREFIX}{{");
    let field = |out: &mut String, key: &str, value: &str| {
        if !out.ends_with('{') {
            out.push_str(", ");
        }
        push_str_literal(out, key);
        out.push_str(": ");
        out.push_str(value);
    };

    field(&mut out, "timestamp", &quoted(&format!("{timestamp} UTC")));
    field(&mut out, "url", &quoted(&record.url));
    field(&mut out, "method", &quoted(&record.method));
    field(&mut out, "user", &user_repr(record.user.as_deref()));
    field(&mut out, "remote_ip", &quoted(&record.remote_ip));
    field(&mut out, "app_name", &quoted(&record.app_name));
    field(&mut out, "view", &quoted(&record.view));
    field(&mut out, "class_name", &quoted(&record.class_name));
    field(&mut out, "function_name", &quoted(&record.function_name));
    field(&mut out, "line_number", &quoted(&record.line_number));
    let mut params = String::new();
    push_literal(&mut params, &record.request_params);
    field(&mut out, "request_params", &params);
    out.push('}');
    out
}

fn user_repr(user: Option<&str>) -> String {
    match user {
        None => quoted("Anonymous"),
        Some(user) if user.contains(&['<', '>'][..]) => quoted(user),
        Some(user) => format!("<SimpleLazyObject: <User: {user}>>"),
    }
}

fn quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    push_str_literal(&mut out, text);
    out
}

fn push_str_literal(out: &mut String, text: &str) {
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch.is_control() => out.push_str(&format!("\\x{:02x}", ch as u32 & 0xff)),
            ch => out.push(ch),
        }
    }
    out.push('\'');
}

fn push_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("None"),
        Value::Bool(b) => out.push_str(python_bool(*b)),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => push_str_literal(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                push_literal(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                push_str_literal(out, key);
                out.push_str(": ");
                push_literal(out, item);
            }
            out.push('}');
        }
    }
}
