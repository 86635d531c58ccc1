//! # Step executor
//!
//! Runs an [`ActionDefinition`] against a page driver: steps in order, each
//! one through condition check, argument interpolation, dispatch under retry
//! and timeout, then `onError` handling. Nested `run` steps recurse on the
//! same task with a derived [`ExecutionContext`].
//!
//! The whole step loop races the action deadline and the caller's
//! cancellation token. When either wins, the loop future is dropped, which
//! cancels whatever handler call was in flight; that step is recorded in the
//! trace as failed.

pub mod context;
pub mod dry_run;
pub mod retry;
mod steps;

#[cfg(test)]
mod tests;

pub use context::{ExecutionContext, InFlight};
pub use dry_run::{DryRunPlan, PlannedStep, Planner};
pub use retry::RetryPolicy;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::{Config, ConditionErrorPolicy, Limits};
use crate::driver::{ActionRegistry, PageDriver, SelectorResolver};
use crate::errors::{ActionError, ErrorKind, Severity, TimeoutScope};
use crate::interpreter::{
    interpolate_string, interpolate_value, resolve_pure, Evaluator, ExpressionError,
    VariableContext,
};
use crate::types::{ActionDefinition, ActionResult, ActionStep, OnError, StepKind, StepTrace};

pub struct Executor {
    driver: Arc<dyn PageDriver>,
    resolver: Arc<dyn SelectorResolver>,
    registry: Arc<dyn ActionRegistry>,
    limits: Limits,
    debug_trace: bool,
    evaluator: Evaluator,
}

enum Raced {
    Finished(Result<JsonValue, ActionError>),
    TimedOut,
    Cancelled,
}

impl Executor {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        resolver: Arc<dyn SelectorResolver>,
        registry: Arc<dyn ActionRegistry>,
    ) -> Self {
        let limits = Limits::default();
        Self {
            driver,
            resolver,
            registry,
            evaluator: Evaluator::new(limits.max_expression_depth),
            limits,
            debug_trace: false,
        }
    }

    pub fn from_config(
        driver: Arc<dyn PageDriver>,
        resolver: Arc<dyn SelectorResolver>,
        registry: Arc<dyn ActionRegistry>,
        config: &Config,
    ) -> Self {
        Self::new(driver, resolver, registry)
            .with_limits(config.limits.clone())
            .with_debug_trace(config.logging.debug_trace)
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.evaluator = Evaluator::new(limits.max_expression_depth);
        self.limits = limits;
        self
    }

    /// Record resolved arguments in step traces
    pub fn with_debug_trace(mut self, enabled: bool) -> Self {
        self.debug_trace = enabled;
        self
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Run an action to completion
    ///
    /// Never panics or returns early without a result: every failure is
    /// reported through [`ActionResult::error`] alongside the partial trace.
    pub async fn execute(
        &self,
        action: &ActionDefinition,
        params: JsonValue,
        env: JsonValue,
    ) -> ActionResult {
        self.execute_with_cancel(action, params, env, CancellationToken::new())
            .await
    }

    /// Like [`Executor::execute`], stopping at the first step boundary or
    /// handler await after `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        action: &ActionDefinition,
        params: JsonValue,
        env: JsonValue,
        cancel: CancellationToken,
    ) -> ActionResult {
        let mut ctx =
            match prepare_context(self.registry.as_ref(), &self.limits, action, params, env, cancel) {
                Ok(ctx) => ctx.with_debug(self.debug_trace),
                Err(err) => {
                    warn!(action = %err.action, error = %err, "action rejected");
                    return ActionResult::failed(err, Vec::new());
                }
            };

        let span = info_span!(
            "action",
            action = %ctx.action,
            depth = ctx.depth,
            execution_id = %ctx.execution_id
        );
        self.execute_in(action, &mut ctx).instrument(span).await
    }

    /// Resolve conditions and arguments without touching the page
    pub fn plan(
        &self,
        action: &ActionDefinition,
        params: JsonValue,
        env: JsonValue,
    ) -> Result<DryRunPlan, ActionError> {
        Planner::new(Arc::clone(&self.registry), self.limits.clone()).plan(action, params, env)
    }

    async fn execute_in(&self, action: &ActionDefinition, ctx: &mut ExecutionContext) -> ActionResult {
        info!(steps = action.steps.len(), "executing action");

        let mut trace = Vec::new();
        let deadline = ctx.deadline();
        let cancel = ctx.cancel.clone();

        let raced = {
            let body = self.run_action(action, ctx, &mut trace);
            tokio::pin!(body);
            tokio::select! {
                result = &mut body => Raced::Finished(result),
                _ = tokio::time::sleep_until(deadline) => Raced::TimedOut,
                _ = cancel.cancelled() => Raced::Cancelled,
            }
        };

        let error = match raced {
            Raced::Finished(Ok(data)) => {
                info!(elapsed_ms = ctx.elapsed().as_millis() as u64, "action succeeded");
                return ActionResult::succeeded(data, trace);
            }
            Raced::Finished(Err(err)) => err,
            Raced::TimedOut => {
                let kind = ErrorKind::Timeout {
                    scope: TimeoutScope::Action,
                    after_ms: ctx.action_timeout.as_millis() as u64,
                };
                interrupt(ctx, &mut trace, kind)
            }
            Raced::Cancelled => interrupt(ctx, &mut trace, ErrorKind::Cancelled),
        };

        warn!(error = %error, code = error.kind.code(), "action failed");
        ActionResult::failed(error, trace)
    }

    /// Steps, then `returns`, then `verify`
    async fn run_action(
        &self,
        action: &ActionDefinition,
        ctx: &mut ExecutionContext,
        trace: &mut Vec<StepTrace>,
    ) -> Result<JsonValue, ActionError> {
        self.run_steps(&action.steps, ctx, trace).await?;
        let data = self.collect_returns(action, ctx)?;
        self.verify(action, ctx)?;
        Ok(data)
    }

    /// Run a step list in order, returning the output of the last step that ran
    fn run_steps<'a>(
        &'a self,
        steps: &'a [ActionStep],
        ctx: &'a mut ExecutionContext,
        trace: &'a mut Vec<StepTrace>,
    ) -> BoxFuture<'a, Result<JsonValue, ActionError>> {
        async move {
            let mut last_output = JsonValue::Null;
            for (index, step) in steps.iter().enumerate() {
                if let Some(output) = self.run_step(index, step, ctx, trace).await? {
                    last_output = output;
                }
            }
            Ok(last_output)
        }
        .boxed()
    }

    /// One step through its whole lifecycle
    ///
    /// `Ok(None)` means the step was skipped or failed under `onError: continue`.
    async fn run_step(
        &self,
        index: usize,
        step: &ActionStep,
        ctx: &mut ExecutionContext,
        trace: &mut Vec<StepTrace>,
    ) -> Result<Option<JsonValue>, ActionError> {
        ctx.check_boundary(index)?;
        if ctx.steps_started >= self.limits.max_steps {
            return Err(ctx.error(
                ErrorKind::MaxStepsExceeded(self.limits.max_steps),
                Some(index),
            ));
        }
        ctx.steps_started += 1;
        let started_at = Utc::now();

        if let Some(condition) = &step.when {
            match self.check_condition(condition, &ctx.vars) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(step = index, kind = %step.action, condition = %condition, "condition false, skipping step");
                    trace.push(StepTrace::skipped(index, step.action, started_at));
                    return Ok(None);
                }
                Err(err) => match self.limits.condition_errors {
                    ConditionErrorPolicy::Proceed => {
                        warn!(step = index, condition = %condition, error = %err, "condition failed to evaluate, running step");
                    }
                    ConditionErrorPolicy::Skip => {
                        warn!(step = index, condition = %condition, error = %err, "condition failed to evaluate, skipping step");
                        trace.push(StepTrace::skipped(index, step.action, started_at));
                        return Ok(None);
                    }
                    ConditionErrorPolicy::Fail => {
                        let err = ctx.error(ErrorKind::Expression(err), Some(index));
                        trace.push(StepTrace::finished(
                            index,
                            step.action,
                            started_at,
                            0,
                            Err(err.to_string()),
                        ));
                        return Err(err);
                    }
                },
            }
        }

        let args = match interpolate_args(&step.args, &ctx.vars) {
            Ok(args) => args,
            Err(err) => {
                let err = ctx.error(ErrorKind::Expression(err), Some(index));
                trace.push(StepTrace::finished(
                    index,
                    step.action,
                    started_at,
                    0,
                    Err(err.to_string()),
                ));
                return Err(err);
            }
        };

        debug!(step = index, kind = %step.action, "dispatching step");
        let tracked = ctx.in_flight.is_none();
        if tracked {
            ctx.in_flight = Some(InFlight {
                index,
                kind: step.action,
                started_at,
                attempts: 0,
            });
        }
        let mut nested = Vec::new();
        let outcome = self
            .attempt(index, step, &args, ctx, &mut nested, tracked)
            .await;
        let recorded_args = ctx.debug.then(|| JsonValue::Object(args.clone()));

        let result = match outcome {
            Ok((value, attempts)) => {
                let mut entry =
                    StepTrace::finished(index, step.action, started_at, attempts, Ok(value.clone()));
                entry.args = recorded_args;
                entry.nested = nested;
                trace.push(entry);
                store_output(step, &value, ctx);
                Ok(Some(value))
            }
            Err((error, attempts)) => {
                let mut entry = StepTrace::finished(
                    index,
                    step.action,
                    started_at,
                    attempts,
                    Err(error.to_string()),
                );
                entry.args = recorded_args;
                entry.nested = nested;
                self.recover(index, step, error, entry, ctx, trace).await
            }
        };

        // Fallback steps run under this step's marker, so an interrupt lands here
        if tracked {
            ctx.in_flight = None;
        }
        result
    }

    /// `onError` handling for a step that failed after its retries
    async fn recover(
        &self,
        index: usize,
        step: &ActionStep,
        error: ActionError,
        mut entry: StepTrace,
        ctx: &mut ExecutionContext,
        trace: &mut Vec<StepTrace>,
    ) -> Result<Option<JsonValue>, ActionError> {
        match (error.severity(), step.on_error) {
            (Severity::Fatal, _) | (Severity::Recoverable, OnError::Abort) => {
                trace.push(entry);
                Err(error.into_step_failure(&ctx.action, index))
            }
            (Severity::Recoverable, OnError::Continue) => {
                warn!(step = index, kind = %step.action, error = %error, "step failed, continuing");
                trace.push(entry);
                Ok(None)
            }
            (Severity::Recoverable, OnError::Fallback) => {
                warn!(
                    step = index,
                    kind = %step.action,
                    error = %error,
                    fallback_steps = step.fallback.len(),
                    "step failed, running fallback"
                );
                let mut fallback_trace = Vec::new();
                let result = self.run_steps(&step.fallback, ctx, &mut fallback_trace).await;
                entry.nested.extend(fallback_trace);
                entry.ended_at = Utc::now();

                match result {
                    Ok(value) => {
                        entry.success = true;
                        entry.output = Some(value.clone());
                        trace.push(entry);
                        store_output(step, &value, ctx);
                        Ok(Some(value))
                    }
                    Err(fallback_error) => {
                        entry.error = Some(fallback_error.to_string());
                        trace.push(entry);
                        Err(fallback_error.into_step_failure(&ctx.action, index))
                    }
                }
            }
        }
    }

    /// Dispatch under the step's retry policy
    ///
    /// Returns the value or the last error, with the number of attempts made.
    async fn attempt(
        &self,
        index: usize,
        step: &ActionStep,
        args: &Map<String, JsonValue>,
        ctx: &mut ExecutionContext,
        nested: &mut Vec<StepTrace>,
        tracked: bool,
    ) -> Result<(JsonValue, u32), (ActionError, u32)> {
        let policy = RetryPolicy::for_step(step, self.limits.max_retry_delay());
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if tracked {
                if let Some(in_flight) = ctx.in_flight.as_mut() {
                    in_flight.attempts = attempt;
                }
            }
            nested.clear();

            match self.dispatch_with_timeout(index, step, args, ctx, nested).await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) if err.is_fatal() || attempt >= policy.max_attempts() => {
                    return Err((err, attempt))
                }
                Err(err) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        step = index,
                        kind = %step.action,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    ctx.check_boundary(index).map_err(|e| (e, attempt))?;
                }
            }
        }
    }

    /// One attempt, bounded by the step timeout
    ///
    /// `run` steps are only bounded when they set an explicit timeout; the
    /// nested action already shares the caller's deadline.
    async fn dispatch_with_timeout(
        &self,
        index: usize,
        step: &ActionStep,
        args: &Map<String, JsonValue>,
        ctx: &mut ExecutionContext,
        nested: &mut Vec<StepTrace>,
    ) -> Result<JsonValue, ActionError> {
        let explicit = step.timeout.map(Duration::from_millis);
        let timeout = explicit.unwrap_or(ctx.step_timeout);

        if step.action == StepKind::Run && explicit.is_none() {
            return self.dispatch(index, step, args, ctx, nested, timeout).await;
        }

        let result =
            tokio::time::timeout(timeout, self.dispatch(index, step, args, ctx, nested, timeout))
                .await;
        match result {
            Ok(result) => result,
            Err(_) => Err(ctx.error(
                ErrorKind::Timeout {
                    scope: TimeoutScope::Step,
                    after_ms: timeout.as_millis() as u64,
                },
                Some(index),
            )),
        }
    }

    fn check_condition(&self, condition: &str, vars: &VariableContext) -> Result<bool, ExpressionError> {
        let source = interpolate_string(condition, vars)?;
        self.evaluator.evaluate_condition(&source, vars)
    }

    /// Build `data`: the `returns` mapping, or every recorded step output
    fn collect_returns(
        &self,
        action: &ActionDefinition,
        ctx: &ExecutionContext,
    ) -> Result<JsonValue, ActionError> {
        let Some(returns) = &action.returns else {
            return Ok(ctx.outputs());
        };

        let mut data = Map::new();
        for (key, template) in returns {
            let value = return_value(template, &ctx.vars)
                .map_err(|err| ctx.error(ErrorKind::Expression(err), None))?;
            data.insert(key.clone(), value);
        }
        Ok(JsonValue::Object(data))
    }

    /// First false condition fails the action
    fn verify(&self, action: &ActionDefinition, ctx: &ExecutionContext) -> Result<(), ActionError> {
        for check in &action.verify {
            let source = if check.condition.contains("${") {
                interpolate_string(&check.condition, &ctx.vars)
                    .map_err(|err| ctx.error(ErrorKind::Expression(err), None))?
            } else {
                check.condition.clone()
            };

            let holds = self
                .evaluator
                .evaluate_condition(&source, &ctx.vars)
                .map_err(|err| ctx.error(ErrorKind::Expression(err), None))?;

            if !holds {
                let message = check
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("condition '{}' does not hold", check.condition));
                return Err(ctx.error(ErrorKind::VerifyFailed(message), None));
            }
        }
        Ok(())
    }
}

/* ===================== Shared Helpers ===================== */

/// Bind params and build the root context of an invocation
pub(crate) fn prepare_context(
    registry: &dyn ActionRegistry,
    limits: &Limits,
    action: &ActionDefinition,
    params: JsonValue,
    env: JsonValue,
    cancel: CancellationToken,
) -> Result<ExecutionContext, ActionError> {
    let full_name = action.full_name();
    let params = action
        .bind_params(params)
        .map_err(|kind| ActionError::new(kind, full_name.clone(), None))?;
    let env = match env {
        JsonValue::Object(map) => map,
        JsonValue::Null => Map::new(),
        _ => {
            return Err(ActionError::new(
                ErrorKind::Validation("env must be an object".to_string()),
                full_name,
                None,
            ))
        }
    };
    let selectors = registry.selectors(action);
    Ok(ExecutionContext::new(
        action, &params, &env, selectors, limits, cancel,
    ))
}

/// Find the target of a `run` step
///
/// Names without a namespace are tried in the caller's namespace first.
pub(crate) fn lookup_target(
    registry: &dyn ActionRegistry,
    target: &str,
    namespace: &str,
) -> Option<Arc<ActionDefinition>> {
    if target.contains(':') || namespace.is_empty() {
        return registry.lookup(target);
    }
    registry
        .lookup(&format!("{}:{}", namespace, target))
        .or_else(|| registry.lookup(target))
}

pub(crate) fn interpolate_args(
    args: &Map<String, JsonValue>,
    vars: &VariableContext,
) -> Result<Map<String, JsonValue>, ExpressionError> {
    let mut out = Map::new();
    for (key, value) in args {
        out.insert(key.clone(), interpolate_value(value, vars)?);
    }
    Ok(out)
}

/// A `returns` entry
///
/// An exact `${scope.path}` keeps its type. Other strings are interpolated and
/// parsed when they hold a JSON object. Arrays and objects are walked.
fn return_value(template: &JsonValue, vars: &VariableContext) -> Result<JsonValue, ExpressionError> {
    match template {
        JsonValue::String(text) => {
            if let Some(value) = resolve_pure(text, vars)? {
                return Ok(value.to_json());
            }
            let rendered = interpolate_string(text, vars)?;
            if rendered.trim_start().starts_with('{') {
                if let Ok(parsed @ JsonValue::Object(_)) = serde_json::from_str(&rendered) {
                    return Ok(parsed);
                }
            }
            Ok(JsonValue::String(rendered))
        }
        JsonValue::Array(items) => items
            .iter()
            .map(|item| return_value(item, vars))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), return_value(value, vars)?);
            }
            Ok(JsonValue::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn store_output(step: &ActionStep, value: &JsonValue, ctx: &mut ExecutionContext) {
    if let Some(name) = &step.output {
        ctx.record_output(name, value);
    }
}

/// Turn the race loser's in-flight step into a failed trace entry
fn interrupt(ctx: &mut ExecutionContext, trace: &mut Vec<StepTrace>, kind: ErrorKind) -> ActionError {
    let in_flight = ctx.in_flight.take();
    let error = ctx.error(kind, in_flight.as_ref().map(|f| f.index));
    if let Some(f) = in_flight {
        trace.push(StepTrace::finished(
            f.index,
            f.kind,
            f.started_at,
            f.attempts,
            Err(error.to_string()),
        ));
    }
    error
}
