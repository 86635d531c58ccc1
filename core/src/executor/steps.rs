//! Step-kind handlers

use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::{debug, info_span, Instrument};

use super::{lookup_target, ExecutionContext, Executor};
use crate::driver::ElementHandle;
use crate::errors::{ActionError, ErrorKind};
use crate::interpreter::Val;
use crate::types::{json_type_name, ActionStep, StepKind, StepTrace};

const DEFAULT_WAIT_STATE: &str = "visible";

impl Executor {
    /// Call the handler for `step` once
    pub(super) async fn dispatch(
        &self,
        index: usize,
        step: &ActionStep,
        args: &Map<String, JsonValue>,
        ctx: &mut ExecutionContext,
        nested: &mut Vec<StepTrace>,
        timeout: Duration,
    ) -> Result<JsonValue, ActionError> {
        if step.action == StepKind::Run {
            let target =
                text_arg(args, "action", step.action).map_err(|k| ctx.error(k, Some(index)))?;
            let params = args
                .get("params")
                .cloned()
                .unwrap_or_else(|| JsonValue::Object(Map::new()));
            return self.run_nested(index, &target, params, ctx, nested).await;
        }
        self.dispatch_page(index, step.action, args, ctx, timeout).await
    }

    /// Handlers that talk to the page
    async fn dispatch_page(
        &self,
        index: usize,
        kind: StepKind,
        args: &Map<String, JsonValue>,
        ctx: &ExecutionContext,
        timeout: Duration,
    ) -> Result<JsonValue, ActionError> {
        let fail = |kind: ErrorKind| ctx.error(kind, Some(index));

        match kind {
            StepKind::Open => {
                let url = text_arg(args, "url", kind).map_err(fail)?;
                self.driver
                    .navigate(&url, timeout)
                    .await
                    .map_err(|e| fail(e.into()))?;
                Ok(JsonValue::Null)
            }
            StepKind::Click => {
                let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                element.click().await.map_err(|e| fail(e.into()))?;
                Ok(JsonValue::Null)
            }
            StepKind::Fill => {
                let value = text_arg(args, "value", kind).map_err(fail)?;
                let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                element.fill(&value).await.map_err(|e| fail(e.into()))?;
                Ok(JsonValue::Null)
            }
            StepKind::Type => {
                let text = text_arg(args, "text", kind).map_err(fail)?;
                let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                element.type_text(&text).await.map_err(|e| fail(e.into()))?;
                Ok(JsonValue::Null)
            }
            StepKind::Press => {
                let key = text_arg(args, "key", kind).map_err(fail)?;
                if has_arg(args, "selector") {
                    let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                    element.press(&key).await.map_err(|e| fail(e.into()))?;
                } else {
                    self.driver
                        .keyboard_press(&key)
                        .await
                        .map_err(|e| fail(e.into()))?;
                }
                Ok(JsonValue::Null)
            }
            StepKind::Wait => {
                if has_arg(args, "ms") {
                    let ms = millis_arg(args, "ms").map_err(fail)?;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                } else {
                    let state = match args.get("state") {
                        Some(JsonValue::String(s)) if !s.is_empty() => s.clone(),
                        _ => DEFAULT_WAIT_STATE.to_string(),
                    };
                    let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                    element
                        .wait_for(&state, timeout)
                        .await
                        .map_err(|e| fail(e.into()))?;
                }
                Ok(JsonValue::Null)
            }
            StepKind::Count => {
                let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                let count = element.count().await.map_err(|e| fail(e.into()))?;
                Ok(JsonValue::from(count))
            }
            StepKind::Visible => {
                let element = self.element(args, kind, ctx, timeout).await.map_err(fail)?;
                let visible = element.is_visible().await.map_err(|e| fail(e.into()))?;
                Ok(JsonValue::Bool(visible))
            }
            StepKind::Eval => {
                let script = text_arg(args, "script", kind).map_err(fail)?;
                self.driver
                    .evaluate(&script)
                    .await
                    .map_err(|e| fail(e.into()))
            }
            StepKind::Run => Err(fail(ErrorKind::InvalidArgument(
                "run steps are not page operations".to_string(),
            ))),
        }
    }

    /// Execute another action as the body of a `run` step
    async fn run_nested(
        &self,
        index: usize,
        target: &str,
        params: JsonValue,
        ctx: &mut ExecutionContext,
        nested: &mut Vec<StepTrace>,
    ) -> Result<JsonValue, ActionError> {
        if ctx.depth >= self.limits.max_depth {
            return Err(ctx.error(
                ErrorKind::MaxDepthExceeded(self.limits.max_depth),
                Some(index),
            ));
        }

        let definition = lookup_target(self.registry.as_ref(), target, &ctx.namespace)
            .ok_or_else(|| ctx.error(ErrorKind::ActionNotFound(target.to_string()), Some(index)))?;

        let params = definition
            .bind_params(params)
            .map_err(|kind| {
                ActionError::new(kind, definition.full_name(), None).into_parent(&ctx.action, index)
            })?;

        let selectors = self.registry.selectors(&definition);
        let mut child = ctx.derive_child(&definition, &params, selectors);
        debug!(step = index, target = %child.action, depth = child.depth, "running nested action");

        let span = info_span!(
            "action",
            action = %child.action,
            depth = child.depth,
            execution_id = %child.execution_id
        );
        let result = self
            .run_action(&definition, &mut child, nested)
            .instrument(span)
            .await;

        result.map_err(|err| err.into_parent(&ctx.action, index))
    }

    /// Locate the element named by the `selector` argument
    ///
    /// Objects, names from the `selectors` scope and JSON object text go to the
    /// selector resolver; any other string is a plain driver selector.
    async fn element(
        &self,
        args: &Map<String, JsonValue>,
        kind: StepKind,
        ctx: &ExecutionContext,
        timeout: Duration,
    ) -> Result<Box<dyn ElementHandle>, ErrorKind> {
        let selector = args
            .get("selector")
            .filter(|v| !v.is_null())
            .ok_or_else(|| missing_arg("selector", kind))?;

        match selector {
            JsonValue::Object(_) => Ok(self.resolver.resolve(selector, timeout).await?),
            JsonValue::String(s) => {
                if let Some(named) = ctx.vars.selectors.get(s) {
                    return match named {
                        Val::Str(plain) => Ok(self.driver.locate(plain).await?),
                        other => Ok(self.resolver.resolve(&other.to_json(), timeout).await?),
                    };
                }
                if let Some(definition) = json_object_text(s) {
                    return Ok(self.resolver.resolve(&definition, timeout).await?);
                }
                Ok(self.driver.locate(s).await?)
            }
            other => Err(ErrorKind::InvalidArgument(format!(
                "{} step: selector must be a string or object, got {}",
                kind,
                json_type_name(other)
            ))),
        }
    }
}

fn has_arg(args: &Map<String, JsonValue>, key: &str) -> bool {
    args.get(key).is_some_and(|v| !v.is_null())
}

fn missing_arg(key: &str, kind: StepKind) -> ErrorKind {
    ErrorKind::InvalidArgument(format!("{} step requires '{}'", kind, key))
}

/// Scalar argument as text; numbers and booleans are stringified
fn text_arg(args: &Map<String, JsonValue>, key: &str, kind: StepKind) -> Result<String, ErrorKind> {
    match args.get(key) {
        None | Some(JsonValue::Null) => Err(missing_arg(key, kind)),
        Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => Err(
            ErrorKind::InvalidArgument(format!("{} step: '{}' must be a scalar", kind, key)),
        ),
        Some(value) => Ok(Val::from(value).to_display_string()),
    }
}

fn millis_arg(args: &Map<String, JsonValue>, key: &str) -> Result<u64, ErrorKind> {
    let raw = args.get(key).map(Val::from).unwrap_or(Val::Undefined);
    let ms = raw.to_number();
    if !ms.is_finite() || ms < 0.0 {
        return Err(ErrorKind::InvalidArgument(format!(
            "wait step: '{}' must be a non-negative number",
            key
        )));
    }
    Ok(ms as u64)
}

/// Parse `text` when it holds a JSON object
fn json_object_text(text: &str) -> Option<JsonValue> {
    if !text.trim_start().starts_with('{') {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value @ JsonValue::Object(_)) => Some(value),
        _ => None,
    }
}
