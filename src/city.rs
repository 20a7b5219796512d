//! City name normalization.
//!
//! City names are free text and are never compared raw. [`normalize`] upper-cases and
//! strips every whitespace character, so `"  new   delhi "` and `"New Delhi"` both become
//! `"NEWDELHI"`. The function is total and idempotent.

use log::warn;
use serde_json::Value;

/// Canonical form of a city name: upper-case with all whitespace removed.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Normalizes an untyped value. Anything that is not a JSON string maps to `""`.
pub fn normalize_value(input: &Value) -> String {
    match input {
        Value::String(s) => normalize(s),
        other => {
            warn!("city name is not text kind={}", value_kind(other));
            String::new()
        }
    }
}

pub(crate) fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
