//! Per-invocation execution state

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Limits;
use crate::errors::{ActionError, ErrorKind, TimeoutScope};
use crate::interpreter::values::json_to_val_map;
use crate::interpreter::{Val, VariableContext};
use crate::types::{ActionDefinition, StepKind};

/// The step currently being dispatched
#[derive(Debug, Clone)]
pub struct InFlight {
    pub index: usize,
    pub kind: StepKind,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
}

/// State threaded through one action invocation
///
/// Nested `run` steps get a context of their own from
/// [`ExecutionContext::derive_child`]: one level deeper, empty `steps`, but the
/// same clock, budget, cancellation token and execution id.
#[derive(Debug)]
pub struct ExecutionContext {
    pub action: String,
    pub namespace: String,
    pub vars: VariableContext,
    pub depth: usize,
    pub started: Instant,
    pub action_timeout: Duration,
    pub step_timeout: Duration,
    pub debug: bool,
    pub execution_id: Uuid,
    pub cancel: CancellationToken,
    pub(crate) steps_started: usize,
    pub(crate) in_flight: Option<InFlight>,
}

impl ExecutionContext {
    pub fn new(
        action: &ActionDefinition,
        params: &Map<String, JsonValue>,
        env: &Map<String, JsonValue>,
        selectors: HashMap<String, JsonValue>,
        limits: &Limits,
        cancel: CancellationToken,
    ) -> Self {
        let vars = VariableContext {
            params: json_to_val_map(params),
            env: json_to_val_map(env),
            selectors: selectors_to_vals(selectors),
            steps: HashMap::new(),
        };
        Self {
            action: action.full_name(),
            namespace: action.namespace.clone(),
            vars,
            depth: 0,
            started: Instant::now(),
            action_timeout: limits.action_timeout(),
            step_timeout: limits.step_timeout(),
            debug: false,
            execution_id: Uuid::new_v4(),
            cancel,
            steps_started: 0,
            in_flight: None,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Context for a nested action
    pub fn derive_child(
        &self,
        action: &ActionDefinition,
        params: &Map<String, JsonValue>,
        selectors: HashMap<String, JsonValue>,
    ) -> Self {
        let vars = VariableContext {
            params: json_to_val_map(params),
            env: self.vars.env.clone(),
            selectors: selectors_to_vals(selectors),
            steps: HashMap::new(),
        };
        Self {
            action: action.full_name(),
            namespace: action.namespace.clone(),
            vars,
            depth: self.depth + 1,
            started: self.started,
            action_timeout: self.action_timeout,
            step_timeout: self.step_timeout,
            debug: self.debug,
            execution_id: self.execution_id,
            cancel: self.cancel.clone(),
            steps_started: 0,
            in_flight: None,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.started + self.action_timeout
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Store a step output under `steps.<name>`
    pub fn record_output(&mut self, name: &str, value: &JsonValue) {
        self.vars.steps.insert(name.to_string(), Val::from(value));
    }

    /// Recorded step outputs as a JSON object
    pub fn outputs(&self) -> JsonValue {
        let mut out = Map::new();
        for (name, value) in &self.vars.steps {
            out.insert(name.clone(), value.to_json());
        }
        JsonValue::Object(out)
    }

    pub fn error(&self, kind: ErrorKind, step: Option<usize>) -> ActionError {
        ActionError::new(kind, self.action.clone(), step)
    }

    /// Checks made before every step: cancellation and the shared time budget
    pub fn check_boundary(&self, step: usize) -> Result<(), ActionError> {
        if self.cancel.is_cancelled() {
            return Err(self.error(ErrorKind::Cancelled, Some(step)));
        }
        if self.elapsed() >= self.action_timeout {
            return Err(self.error(
                ErrorKind::Timeout {
                    scope: TimeoutScope::Action,
                    after_ms: self.action_timeout.as_millis() as u64,
                },
                Some(step),
            ));
        }
        Ok(())
    }
}

fn selectors_to_vals(selectors: HashMap<String, JsonValue>) -> HashMap<String, Val> {
    selectors
        .into_iter()
        .map(|(name, definition)| (name, Val::from(definition)))
        .collect()
}
