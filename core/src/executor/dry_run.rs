//! Dry-run analysis
//!
//! Walks an action the way the executor would (parameter binding, conditions,
//! argument interpolation, nested `run` expansion) without dispatching a
//! single handler. `steps.*` references resolve to `undefined`, since no step
//! has produced anything.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{interpolate_args, lookup_target, prepare_context, ExecutionContext};
use crate::config::{ConditionErrorPolicy, Limits};
use crate::driver::ActionRegistry;
use crate::errors::{ActionError, ErrorKind};
use crate::interpreter::{interpolate_string, Evaluator};
use crate::types::{ActionDefinition, ActionStep, OnError, StepKind};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunPlan {
    pub action: String,
    pub depth: usize,
    pub params: JsonValue,
    pub steps: Vec<PlannedStep>,
    /// Conditions checked after the steps
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub verify: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedStep {
    pub index: usize,
    pub kind: StepKind,
    /// Arguments after interpolation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<JsonValue>,
    /// Why the arguments or the condition could not be resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub will_execute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub on_error: OnError,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<PlannedStep>,
    /// Plan of the target of a `run` step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nested: Option<Box<DryRunPlan>>,
}

pub struct Planner {
    registry: Arc<dyn ActionRegistry>,
    limits: Limits,
    evaluator: Evaluator,
}

impl Planner {
    pub fn new(registry: Arc<dyn ActionRegistry>, limits: Limits) -> Self {
        Self {
            registry,
            evaluator: Evaluator::new(limits.max_expression_depth),
            limits,
        }
    }

    pub fn plan(
        &self,
        action: &ActionDefinition,
        params: JsonValue,
        env: JsonValue,
    ) -> Result<DryRunPlan, ActionError> {
        let mut ctx = prepare_context(
            self.registry.as_ref(),
            &self.limits,
            action,
            params,
            env,
            CancellationToken::new(),
        )?;
        self.plan_action(action, &mut ctx)
    }

    fn plan_action(
        &self,
        action: &ActionDefinition,
        ctx: &mut ExecutionContext,
    ) -> Result<DryRunPlan, ActionError> {
        let steps = self.plan_steps(&action.steps, ctx)?;
        let params = ctx
            .vars
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<Map<_, _>>();
        Ok(DryRunPlan {
            action: ctx.action.clone(),
            depth: ctx.depth,
            params: JsonValue::Object(params),
            steps,
            verify: action.verify.iter().map(|v| v.condition.clone()).collect(),
        })
    }

    fn plan_steps(
        &self,
        steps: &[ActionStep],
        ctx: &mut ExecutionContext,
    ) -> Result<Vec<PlannedStep>, ActionError> {
        steps
            .iter()
            .enumerate()
            .map(|(index, step)| self.plan_step(index, step, ctx))
            .collect()
    }

    fn plan_step(
        &self,
        index: usize,
        step: &ActionStep,
        ctx: &mut ExecutionContext,
    ) -> Result<PlannedStep, ActionError> {
        if ctx.steps_started >= self.limits.max_steps {
            return Err(ctx.error(
                ErrorKind::MaxStepsExceeded(self.limits.max_steps),
                Some(index),
            ));
        }
        ctx.steps_started += 1;

        let mut planned = PlannedStep {
            index,
            kind: step.action,
            args: None,
            error: None,
            will_execute: true,
            skip_reason: None,
            output: step.output.clone(),
            on_error: step.on_error,
            fallback: Vec::new(),
            nested: None,
        };

        if let Some(condition) = &step.when {
            let outcome = interpolate_string(condition, &ctx.vars)
                .and_then(|source| self.evaluator.evaluate_condition(&source, &ctx.vars));
            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    planned.will_execute = false;
                    planned.skip_reason = Some(format!("condition '{}' is false", condition));
                }
                Err(err) => {
                    planned.error = Some(err.to_string());
                    match self.limits.condition_errors {
                        ConditionErrorPolicy::Proceed => {}
                        ConditionErrorPolicy::Skip => {
                            planned.will_execute = false;
                            planned.skip_reason =
                                Some(format!("condition '{}' failed to evaluate", condition));
                        }
                        ConditionErrorPolicy::Fail => {
                            return Err(ctx.error(ErrorKind::Expression(err), Some(index)))
                        }
                    }
                }
            }
        }

        if !planned.will_execute {
            return Ok(planned);
        }

        match interpolate_args(&step.args, &ctx.vars) {
            Ok(args) => {
                if step.action == StepKind::Run {
                    match args.get("action") {
                        Some(JsonValue::String(target)) => {
                            match self.plan_nested(index, target, &args, ctx) {
                                Ok(plan) => planned.nested = Some(Box::new(plan)),
                                // Failures a `run` step could recover from at execution time
                                Err(err) if !err.is_fatal() => planned.error = Some(err.to_string()),
                                Err(err) => return Err(err),
                            }
                        }
                        _ => {
                            let err = ErrorKind::InvalidArgument(
                                "run step requires 'action'".to_string(),
                            );
                            planned.error = Some(err.to_string());
                        }
                    }
                }
                planned.args = Some(JsonValue::Object(args));
            }
            Err(err) => planned.error = Some(err.to_string()),
        }

        if step.on_error == OnError::Fallback {
            planned.fallback = self.plan_steps(&step.fallback, ctx)?;
        }

        Ok(planned)
    }

    fn plan_nested(
        &self,
        index: usize,
        target: &str,
        args: &Map<String, JsonValue>,
        ctx: &ExecutionContext,
    ) -> Result<DryRunPlan, ActionError> {
        if ctx.depth >= self.limits.max_depth {
            return Err(ctx.error(
                ErrorKind::MaxDepthExceeded(self.limits.max_depth),
                Some(index),
            ));
        }

        let definition = lookup_target(self.registry.as_ref(), target, &ctx.namespace)
            .ok_or_else(|| ctx.error(ErrorKind::ActionNotFound(target.to_string()), Some(index)))?;

        let params = args
            .get("params")
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Map::new()));
        let params = definition
            .bind_params(params)
            .map_err(|kind| {
                ActionError::new(kind, definition.full_name(), None).into_parent(&ctx.action, index)
            })?;

        let selectors = self.registry.selectors(&definition);
        let mut child = ctx.derive_child(&definition, &params, selectors);
        self.plan_action(&definition, &mut child)
    }
}
