use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

use crate::errors::{ActionError, ErrorKind};

/* ===================== Action Definitions ===================== */

/// A named, parameterized sequence of steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub steps: Vec<ActionStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<Map<String, JsonValue>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verify: Vec<VerifySpec>,
}

impl ActionDefinition {
    /// `namespace:name`, or just `name` outside a namespace
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.namespace, self.name)
        }
    }

    /// Check caller-supplied params against the declared specs
    ///
    /// Fills defaults for missing (or null) params and rejects missing required
    /// ones. Params that are not declared pass through untouched.
    pub fn bind_params(&self, params: JsonValue) -> Result<Map<String, JsonValue>, ErrorKind> {
        let mut bound = match params {
            JsonValue::Object(map) => map,
            JsonValue::Null => Map::new(),
            other => {
                return Err(ErrorKind::Validation(format!(
                    "params must be an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        for spec in &self.params {
            let provided = bound.get(&spec.name).filter(|v| !v.is_null());
            match (provided, &spec.default) {
                (Some(value), _) => {
                    if !spec.param_type.matches(value) {
                        return Err(ErrorKind::Validation(format!(
                            "param '{}' must be {}, got {}",
                            spec.name,
                            spec.param_type,
                            json_type_name(value)
                        )));
                    }
                }
                (None, Some(default)) => {
                    bound.insert(spec.name.clone(), default.clone());
                }
                (None, None) if spec.required => {
                    return Err(ErrorKind::Validation(format!(
                        "missing required param '{}'",
                        spec.name
                    )));
                }
                (None, None) => {}
            }
        }

        Ok(bound)
    }
}

/// Declared parameter of an action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: ParamType,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    Any,
}

impl ParamType {
    pub fn matches(&self, value: &JsonValue) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => true,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Any => "any",
        };
        write!(f, "{}", s)
    }
}

/// Post-condition checked after all steps succeed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySpec {
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/* ===================== Steps ===================== */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Open,
    Click,
    Fill,
    Type,
    Press,
    Wait,
    Count,
    Visible,
    Eval,
    Run,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Open => "open",
            StepKind::Click => "click",
            StepKind::Fill => "fill",
            StepKind::Type => "type",
            StepKind::Press => "press",
            StepKind::Wait => "wait",
            StepKind::Count => "count",
            StepKind::Visible => "visible",
            StepKind::Eval => "eval",
            StepKind::Run => "run",
        };
        write!(f, "{}", s)
    }
}

/// What to do when a step fails after its retries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    Continue,
    #[default]
    Abort,
    Fallback,
}

/// One step of an action
///
/// `args` may contain `${scope.path}` references; they are interpolated right
/// before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub action: StepKind,
    #[serde(default)]
    pub args: Map<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Per-attempt timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry: u32,
    /// Base backoff in milliseconds, doubled after every failed attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default)]
    pub on_error: OnError,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<ActionStep>,
}

pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

fn default_retry_delay() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

/* ===================== Results ===================== */

/// What happened to one step
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepTrace {
    pub index: usize,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub skipped: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Resolved arguments, recorded only with debug tracing on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
    /// Fallback steps, or the trace of a nested action
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<StepTrace>,
}

impl StepTrace {
    pub fn skipped(index: usize, kind: StepKind, started_at: DateTime<Utc>) -> Self {
        Self {
            index,
            kind,
            started_at,
            ended_at: Utc::now(),
            success: true,
            skipped: true,
            attempts: 0,
            output: None,
            error: None,
            args: None,
            nested: Vec::new(),
        }
    }

    pub fn finished(
        index: usize,
        kind: StepKind,
        started_at: DateTime<Utc>,
        attempts: u32,
        outcome: Result<JsonValue, String>,
    ) -> Self {
        let (success, output, error) = match outcome {
            Ok(value) => (true, Some(value), None),
            Err(message) => (false, None, Some(message)),
        };
        Self {
            index,
            kind,
            started_at,
            ended_at: Utc::now(),
            success,
            skipped: false,
            attempts,
            output,
            error,
            args: None,
            nested: Vec::new(),
        }
    }
}

/// Outcome of one executor invocation
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub data: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    pub trace: Vec<StepTrace>,
}

impl ActionResult {
    pub fn succeeded(data: JsonValue, trace: Vec<StepTrace>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            trace,
        }
    }

    pub fn failed(error: ActionError, trace: Vec<StepTrace>) -> Self {
        Self {
            success: false,
            data: JsonValue::Null,
            error: Some(error),
            trace,
        }
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
