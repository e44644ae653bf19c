//! Normalization of framework object reprs such as `<SimpleLazyObject: <User: bob@example.com>>`.
//!
//! The producer stringifies in-memory objects, so identity fields arrive as nested wrapper
//! reprs. Every rule for unwrapping them lives here.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// `<Class: inner>`; `inner` may itself be another repr.
fn layer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^<(?P<class>[A-Za-z_][\w.]*): ?(?P<inner>.*)>$").expect("static regex")
    })
}

/// `<module.Class object at 0x7f...>`, the default repr of objects without a custom one.
fn object_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^<(?P<class>[A-Za-z_][\w.]*) object at 0x[0-9A-Fa-f]+>$").expect("static regex")
    })
}

const ANONYMOUS_SENTINELS: [&str; 4] = ["", "none", "anonymous", "anonymoususer"];

/// Unwraps a complete `<...>` repr to the text of its innermost layer.
///
/// Bare object reprs and anything that does not follow the `<Class: value>` shape carry no
/// usable text and become `null`.
pub(crate) fn normalize_repr(text: &str) -> Value {
    let mut current = text.trim();
    loop {
        if object_re().is_match(current) {
            return Value::Null;
        }
        let Some(caps) = layer_re().captures(current) else {
            return Value::Null;
        };
        let inner = caps.name("inner").map_or("", |m| m.as_str()).trim();
        if is_repr(inner) {
            current = inner;
            continue;
        }
        if inner.is_empty() {
            return Value::Null;
        }
        return Value::String(inner.to_string());
    }
}

fn is_repr(text: &str) -> bool {
    text.starts_with('<') && text.ends_with('>')
}

/// Normalizes an identity value: unwraps reprs that arrived as quoted text and maps the
/// anonymous sentinels to `None`.
pub(crate) fn normalize_identity(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let unwrapped = if is_repr(trimmed) {
        match normalize_repr(trimmed) {
            Value::String(inner) => inner,
            _ => return None,
        }
    } else {
        trimmed.to_string()
    };
    if is_anonymous(&unwrapped) {
        None
    } else {
        Some(unwrapped)
    }
}

pub(crate) fn is_anonymous(text: &str) -> bool {
    let lowered = text.trim().to_ascii_lowercase();
    ANONYMOUS_SENTINELS.contains(&lowered.as_str())
}
