//! Dynamically typed values carried by parameters and expression results.
//!
//! Values are plain [`serde_json::Value`]s: strings, numbers, booleans or
//! parsed JSON. Raw bus payloads enter through [`coerce`] and leave through
//! [`render`].

use serde_json::{Number, Value};

/// Convert a raw payload into a value.
///
/// Integers become integral numbers, other finite floats become floating
/// numbers and everything else stays a string.
#[must_use]
pub fn coerce(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::Number(int.into());
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map_or_else(|| Value::String(raw.to_string()), Value::Number)
}

/// Render a value as the text that is published on the bus.
///
/// Strings are emitted without quotes, `null` renders as an empty string and
/// whole floating numbers drop their fractional part (`42.0` → `42`).
#[must_use]
pub fn render(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => render_number(number),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn render_number(number: &Number) -> String {
    if number.is_i64() || number.is_u64() {
        return number.to_string();
    }
    number
        .as_f64()
        .map_or_else(|| number.to_string(), |float| float.to_string())
}

/// Sentinel returned for parameters that were never set.
#[must_use]
pub fn unset() -> Value {
    Value::String(String::new())
}
