//! Log-friendly rendering of peer frames.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static BASE64_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=]+$").expect("base64 regex must compile"));

/// Strings at least this long that look like base64 are elided.
const MIN_REDACTED_LEN: usize = 100;

/// Replace long base64 strings inside a JSON frame with a length marker.
///
/// Anything that does not parse as JSON is returned unchanged; this is only
/// ever used for log output.
pub fn redact_base64(raw: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    redact_value(&mut value);
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
}

fn redact_value(value: &mut Value) {
    match value {
        Value::String(text) if text.len() > MIN_REDACTED_LEN && BASE64_TEXT.is_match(text) => {
            let marker = format!("<base64 data: {} chars>", text.len());
            *value = Value::String(marker);
        }
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        Value::Object(map) => map.values_mut().for_each(redact_value),
        _ => {}
    }
}
