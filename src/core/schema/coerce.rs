//! Lenient conversions from loosely-typed JSON into stage field types.
//!
//! Model output and transport payloads disagree on how booleans and lengths
//! are spelled (`"YES"`, `1`, `"true"`, `"max"`, ...). Everything funnels
//! through the helpers here so both sides normalize identically.

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// SQL Server reports `(max)` lengths as -1.
pub const MAX_LENGTH: i64 = -1;

pub fn bool_from_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `Ok(None)` means "no length" (null, empty, or absent); `Err` means the
/// value is present but not interpretable.
pub fn length_from_value(value: &Value) -> Result<Option<i64>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(v), _) => Ok(Some(v)),
            // `4.0` is an integer spelled as a float; `4.7` is not a length.
            (None, Some(f)) if f.fract() == 0.0 && f.abs() <= i64::MAX as f64 => {
                Ok(Some(f as i64))
            }
            (None, Some(f)) if f.fract() != 0.0 => {
                Err(format!("length {} is not a whole number", n))
            }
            _ => Err(format!("length {} is out of range", n)),
        },
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                Ok(None)
            } else if trimmed.eq_ignore_ascii_case("max") {
                Ok(Some(MAX_LENGTH))
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| format!("length '{}' is not a number", trimmed))
            }
        }
        other => Err(format!("length {} has an unsupported type", other)),
    }
}

pub fn text_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Case-insensitive lookup of the first alias present in `obj`.
pub fn lookup<'a>(obj: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a Value> {
    aliases.iter().find_map(|alias| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(alias))
            .map(|(_, v)| v)
            .filter(|v| !v.is_null())
    })
}

pub fn lookup_text(obj: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    lookup(obj, aliases)
        .and_then(text_from_value)
        .filter(|s| !s.is_empty())
}

/// Identifier normalization used for keys and text comparison: trimmed,
/// bracket quoting removed, ASCII lowercase.
pub fn normalize_ident(s: &str) -> String {
    let trimmed = s.trim();
    let unquoted = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    unquoted.trim().to_ascii_lowercase()
}

pub fn boolean<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    bool_from_value(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a boolean, found {}", value)))
}

pub fn length<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    length_from_value(&value).map_err(serde::de::Error::custom)
}
