//! Runtime value type
//!
//! A closed union with explicit coercion rules. Nothing here leans on a host
//! language's notion of truthiness or equality.

use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Null,
    /// Result of resolving a path that does not exist
    Undefined,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(HashMap<String, Val>),
}

impl Val {
    /// `false, 0, "", null, undefined, NaN` are falsy, everything else truthy
    pub fn to_bool(&self) -> bool {
        match self {
            Val::Null | Val::Undefined => false,
            Val::Bool(b) => *b,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::List(_) | Val::Obj(_) => true,
        }
    }

    /// Numeric coercion used by comparisons and loose equality
    pub fn to_number(&self) -> f64 {
        match self {
            Val::Num(n) => *n,
            Val::Str(s) => parse_numeric_str(s),
            Val::Bool(true) => 1.0,
            Val::Bool(false) => 0.0,
            Val::Null => 0.0,
            Val::Undefined | Val::List(_) | Val::Obj(_) => f64::NAN,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Val::Null | Val::Undefined)
    }

    /// Loose equality
    ///
    /// Identical values are equal, `null` and `undefined` equal each other,
    /// otherwise both sides are compared as numbers (NaN equals nothing).
    pub fn loose_eq(&self, other: &Val) -> bool {
        if self.is_nullish() && other.is_nullish() {
            return true;
        }
        if self.identical(other) {
            return true;
        }
        let (l, r) = (self.to_number(), other.to_number());
        !l.is_nan() && !r.is_nan() && l == r
    }

    fn identical(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Num(a), Val::Num(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::List(a), Val::List(b)) => a == b,
            (Val::Obj(a), Val::Obj(b)) => a == b,
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Undefined => "undefined",
            Val::Bool(_) => "boolean",
            Val::Num(_) => "number",
            Val::Str(_) => "string",
            Val::List(_) => "array",
            Val::Obj(_) => "object",
        }
    }

    /// Text used when the value is spliced into a string
    ///
    /// Objects and arrays become JSON text, `null`/`undefined` the empty string.
    pub fn to_display_string(&self) -> String {
        match self {
            Val::Null | Val::Undefined => String::new(),
            Val::Bool(b) => b.to_string(),
            Val::Num(n) => format_number(*n),
            Val::Str(s) => s.clone(),
            Val::List(_) | Val::Obj(_) => self.to_json().to_string(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Val::Null | Val::Undefined => JsonValue::Null,
            Val::Bool(b) => JsonValue::Bool(*b),
            Val::Num(n) => number_to_json(*n),
            Val::Str(s) => JsonValue::String(s.clone()),
            Val::List(items) => JsonValue::Array(items.iter().map(Val::to_json).collect()),
            Val::Obj(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json());
                }
                JsonValue::Object(out)
            }
        }
    }
}

impl From<&JsonValue> for Val {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Val::Null,
            JsonValue::Bool(b) => Val::Bool(*b),
            JsonValue::Number(n) => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
            JsonValue::String(s) => Val::Str(s.clone()),
            JsonValue::Array(items) => Val::List(items.iter().map(Val::from).collect()),
            JsonValue::Object(map) => Val::Obj(
                map.iter()
                    .map(|(k, v)| (k.clone(), Val::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for Val {
    fn from(value: JsonValue) -> Self {
        Val::from(&value)
    }
}

impl From<&Val> for JsonValue {
    fn from(value: &Val) -> Self {
        value.to_json()
    }
}

impl Serialize for Val {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Convert a JSON object map into a scope map
pub fn json_to_val_map(map: &Map<String, JsonValue>) -> HashMap<String, Val> {
    map.iter().map(|(k, v)| (k.clone(), Val::from(v))).collect()
}

fn number_to_json(n: f64) -> JsonValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        return JsonValue::Number(Number::from(n as i64));
    }
    Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Shortest form: `42`, `1.5`, `NaN`, `Infinity`, `1e+21`, `1e-7`
///
/// Magnitudes of at least 1e21 or below 1e-6 use exponent notation.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let magnitude = n.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let text = format!("{:e}", n);
        return match text.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => text,
        };
    }
    n.to_string()
}

fn parse_numeric_str(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    // f64::from_str also accepts "inf" and "nan", which are not numeric text here
    let numeric_chars = trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'));
    if !numeric_chars || !trimmed.chars().any(|c| c.is_ascii_digit()) {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
