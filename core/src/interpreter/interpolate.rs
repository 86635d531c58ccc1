//! `${scope.path}` interpolation
//!
//! Two flavours:
//! - [`interpolate_string`] splices stringified values into text
//! - [`resolve_pure`] handles a string that is exactly one reference and
//!   keeps the referenced value's type

use serde_json::{Map, Value as JsonValue};

use super::errors::ExpressionError;
use super::scope::{resolve_path, VariableContext};
use super::values::Val;

const OPEN: &str = "${";
const CLOSE: char = '}';

/// Replace every `${scope.path}` in `input` with the stringified value
///
/// Text without `${` comes back unchanged. An unterminated `${` is kept
/// literally.
pub fn interpolate_string(input: &str, vars: &VariableContext) -> Result<String, ExpressionError> {
    if !input.contains(OPEN) {
        return Ok(input.to_string());
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut consumed = 0usize;

    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };

        out.push_str(&rest[..start]);

        let path = after_open[..end].trim();
        let offset = char_offset(input, consumed + start);
        let value = resolve_path(path, vars)
            .map_err(|e| ExpressionError::eval(e.to_string(), offset, input))?;
        out.push_str(&value.to_display_string());

        let advance = start + OPEN.len() + end + 1;
        consumed += advance;
        rest = &rest[advance..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Interpolate every string inside a JSON value, recursing into arrays and objects
pub fn interpolate_value(value: &JsonValue, vars: &VariableContext) -> Result<JsonValue, ExpressionError> {
    match value {
        JsonValue::String(s) => Ok(JsonValue::String(interpolate_string(s, vars)?)),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| interpolate_value(v, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), interpolate_value(v, vars)?);
            }
            Ok(JsonValue::Object(out))
        }
        _ => Ok(value.clone()),
    }
}

/// The path inside a string that is exactly `${scope.path}`, if it is one
pub fn pure_reference(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    let inner = trimmed.strip_prefix(OPEN)?.strip_suffix(CLOSE)?;
    if inner.contains(OPEN) || inner.contains(CLOSE) {
        return None;
    }
    let path = inner.trim();
    (!path.is_empty()).then_some(path)
}

/// Resolve a pure reference keeping its type
///
/// Returns `Ok(None)` when `input` is not a pure reference.
pub fn resolve_pure(input: &str, vars: &VariableContext) -> Result<Option<Val>, ExpressionError> {
    let Some(path) = pure_reference(input) else {
        return Ok(None);
    };
    let offset = input.chars().take_while(|c| c.is_whitespace()).count();
    resolve_path(path, vars)
        .map(Some)
        .map_err(|e| ExpressionError::eval(e.to_string(), offset, input))
}

fn char_offset(s: &str, byte_idx: usize) -> usize {
    s[..byte_idx].chars().count()
}
