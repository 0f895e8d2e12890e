//! Recovery of a JSON object from noisy computation output.
//!
//! The external tool may print progress lines around its final JSON object.
//! Parsing first tries the whole (trimmed) text, then falls back to a
//! line-oriented brace-depth scan. This is a heuristic for that output, not
//! a JSON grammar.

use crate::error::{excerpt, BaselineError, BaselineResult};
use serde_json::{Map, Value};

pub struct ResultParser;

impl ResultParser {
    pub fn parse(raw: &str) -> BaselineResult<Map<String, Value>> {
        let trimmed = raw.trim();

        if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(trimmed) {
            return Ok(object);
        }

        let lines: Vec<&str> = trimmed.lines().collect();
        for (start, line) in lines.iter().enumerate() {
            if !line.trim_start().starts_with('{') {
                continue;
            }
            if let Some(candidate) = Self::balanced_slice(&lines[start..]) {
                if let Ok(Value::Object(object)) = serde_json::from_str::<Value>(&candidate) {
                    tracing::debug!(
                        skipped_lines = start,
                        "recovered JSON object from noisy computation output"
                    );
                    return Ok(object);
                }
            }
        }

        Err(BaselineError::ResultParseError {
            excerpt: excerpt(raw),
        })
    }

    /// Every name in `required` that is absent (or `null`) in `object`.
    pub fn missing_fields(object: &Map<String, Value>, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|field| object.get(**field).map_or(true, Value::is_null))
            .map(|field| field.to_string())
            .collect()
    }

    /// Fails with `MissingFields` naming every absent field.
    pub fn validate_json_structure(
        object: &Map<String, Value>,
        required: &[&str],
    ) -> BaselineResult<()> {
        let missing = Self::missing_fields(object, required);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BaselineError::MissingFields(missing))
        }
    }

    /// Text from the first `{` of `lines[0]` to the brace that brings depth
    /// back to zero. Braces inside JSON strings do not count.
    fn balanced_slice(lines: &[&str]) -> Option<String> {
        let mut depth: i64 = 0;
        let mut in_string = false;
        let mut escaped = false;
        let mut out = String::new();

        for (n, line) in lines.iter().enumerate() {
            let line = if n == 0 { line.trim_start() } else { line };
            for (idx, ch) in line.char_indices() {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        in_string = false;
                    }
                    continue;
                }
                match ch {
                    '"' => in_string = true,
                    '{' => depth += 1,
                    '}' => {
                        depth -= 1;
                        if depth == 0 {
                            out.push_str(&line[..idx + ch.len_utf8()]);
                            return Some(out);
                        }
                    }
                    _ => {}
                }
            }
            out.push_str(line);
            out.push('\n');
        }
        None
    }
}

/// Reads a required numeric field.
pub fn require_number(object: &Map<String, Value>, field: &str) -> BaselineResult<f64> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .ok_or_else(|| BaselineError::InvalidResultShape(format!("'{}' must be a number", field)))
}

/// Reads an optional numeric field; present-but-wrong-type is an error.
pub fn optional_number(object: &Map<String, Value>, field: &str) -> BaselineResult<Option<f64>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            BaselineError::InvalidResultShape(format!("'{}' must be a number", field))
        }),
    }
}

pub fn optional_string(object: &Map<String, Value>, field: &str) -> Option<String> {
    object.get(field).and_then(Value::as_str).map(str::to_string)
}
