//! Canonical string form of scalar values.
//!
//! Every index key segment and every equality comparison goes through
//! [`normalize`], so two values are "equal" for query purposes exactly when
//! their normalized forms are byte-equal. Only scalars normalize; arrays and
//! objects yield `None` and are handled element-wise (or not at all) by the
//! caller.

use serde_json::Value;

/// Reserved separator between composite key segments.
///
/// The ASCII unit separator cannot appear in a normalized value because
/// [`normalize`] strips it from strings, which keeps prefix matching on
/// composite keys unambiguous.
pub const KEY_SEPARATOR: char = '\u{1F}';

/// Normalize a scalar to its canonical string form.
///
/// - strings pass through (minus any embedded separator bytes)
/// - integral numbers render without a fractional part (`29`, never `29.0`)
/// - booleans render as `true` / `false`
/// - null, arrays and objects are not normalizable
pub fn normalize(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            if s.contains(KEY_SEPARATOR) {
                Some(s.chars().filter(|c| *c != KEY_SEPARATOR).collect())
            } else {
                Some(s.clone())
            }
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                let f = n.as_f64()?;
                // 29.0 and 29 must normalize identically.
                if f.fract() == 0.0 && f.abs() < 9e15 {
                    Some(format!("{}", f as i64))
                } else {
                    Some(f.to_string())
                }
            }
        }
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Join normalized segments into a composite key.
pub fn join_key(segments: &[String]) -> String {
    let mut key = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for (i, seg) in segments.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(seg);
    }
    key
}

/// Split a composite key back into its segments.
pub fn split_key(key: &str) -> Vec<&str> {
    key.split(KEY_SEPARATOR).collect()
}

/// True when `key` is the prefix key itself or extends it with further
/// segments. `age=29` must not match `age=290`, hence the separator check.
pub fn key_matches_prefix(key: &str, prefix: &str) -> bool {
    if !key.starts_with(prefix) {
        return false;
    }
    key.len() == prefix.len() || key[prefix.len()..].starts_with(KEY_SEPARATOR)
}
