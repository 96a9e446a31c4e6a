//! Pulls structured values out of free-form Oracle text.
//!
//! Oracle responses routinely wrap JSON in prose or Markdown fences, and some
//! providers emit typographic quotes. Nothing here trusts the text: every entry
//! point either returns a validated value or a typed error carrying the raw text.

use crate::errors::AppError;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::OnceLock;

/// Replaces typographic quotes with their ASCII equivalents.
pub fn clean_quotes(text: &str) -> String {
    text.replace(|c: char| matches!(c, '\u{201C}' | '\u{201D}'), "\"")
        .replace(|c: char| matches!(c, '\u{2018}' | '\u{2019}'), "'")
}

/// First balanced `{...}` in `text` that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<Value> {
    extract_first(text, b'{', b'}')
}

/// First balanced `[...]` in `text` that parses as a JSON array.
pub fn extract_json_array(text: &str) -> Option<Value> {
    extract_first(text, b'[', b']')
}

fn extract_first(text: &str, open: u8, close: u8) -> Option<Value> {
    scan(text, open, close).or_else(|| {
        let cleaned = clean_quotes(text);
        if cleaned == text {
            None
        } else {
            scan(&cleaned, open, close)
        }
    })
}

fn scan(text: &str, open: u8, close: u8) -> Option<Value> {
    let bytes = text.as_bytes();
    let expect_object = open == b'{';

    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == open)
        .find_map(|(start, _)| {
            let end = balanced_end(bytes, start, open, close)?;
            let value: Value = serde_json::from_str(&text[start..=end]).ok()?;
            let shape_ok = if expect_object {
                value.is_object()
            } else {
                value.is_array()
            };
            shape_ok.then_some(value)
        })
}

/// Index of the delimiter closing the one at `start`, skipping string contents.
///
/// Works on bytes: every delimiter is ASCII and UTF-8 continuation bytes never
/// collide with ASCII, so the returned index is always a char boundary.
fn balanced_end(bytes: &[u8], start: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        if b == b'"' {
            in_string = true;
        } else if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(start + offset);
            }
        }
    }

    None
}

/// Extracts the first JSON object, or fails with `OracleFormat`.
pub fn parse_object(raw: &str, stage: &str) -> Result<Value, AppError> {
    extract_json_object(raw)
        .ok_or_else(|| AppError::oracle_format(stage, "no well-formed JSON object in response", raw))
}

/// Extracts the first JSON object and deserializes it into `T`.
///
/// No JSON at all is an `OracleFormat` error; JSON with the wrong shape
/// (missing required field, unknown ordinal) is a `Validation` error.
pub fn parse_typed<T: DeserializeOwned>(raw: &str, stage: &str) -> Result<T, AppError> {
    let value = parse_object(raw, stage)?;
    from_value(value, raw, stage)
}

/// Deserializes an already extracted value, mapping shape errors to `Validation`.
pub fn from_value<T: DeserializeOwned>(value: Value, raw: &str, stage: &str) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::validation(stage, format!("unexpected JSON shape: {}", e), raw))
}

/// A list of items from either a JSON array (possibly wrapped in an object under
/// `key`) or a top-level array, or `None` when neither is present.
pub fn extract_list(raw: &str, key: &str) -> Option<Vec<Value>> {
    if let Some(mut object) = extract_json_object(raw) {
        if let Some(Value::Array(items)) = object.get_mut(key).map(Value::take) {
            return Some(items);
        }
    }
    match extract_json_array(raw) {
        Some(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn list_marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| Regex::new(r"^\s*(?:[-*•]+|\d+[.)]|\(\d+\))\s*").expect("valid regex"))
}

/// Reads a list of short strings, such as search queries.
///
/// Accepts a JSON array of strings, or one item per line with bullets and
/// numbering stripped. Empty items are dropped.
pub fn string_list(raw: &str) -> Vec<String> {
    if let Some(Value::Array(items)) = extract_json_array(raw) {
        let strings: Vec<String> = items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !strings.is_empty() {
            return strings;
        }
    }

    raw.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with("```"))
        .map(|line| list_marker().replace(line, "").to_string())
        .map(|line| line.trim().trim_matches('"').trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
