//! Test helpers for expression tests

use crate::interpreter::{Evaluator, Val, VariableContext};
use serde_json::{json, Value as JsonValue};

/// Build a variable context from JSON objects for each scope
pub fn vars(params: JsonValue, env: JsonValue, steps: JsonValue) -> VariableContext {
    let to_map = |v: JsonValue| match Val::from(v) {
        Val::Obj(map) => map,
        other => panic!("scope must be an object, got {:?}", other),
    };
    VariableContext {
        params: to_map(params),
        env: to_map(env),
        selectors: Default::default(),
        steps: to_map(steps),
    }
}

/// Context with only params populated
pub fn with_params(params: JsonValue) -> VariableContext {
    vars(params, json!({}), json!({}))
}

/// Evaluate with the default evaluator, panicking on error
pub fn eval_ok(source: &str, ctx: &VariableContext) -> Val {
    Evaluator::default()
        .evaluate_str(source, ctx)
        .unwrap_or_else(|e| panic!("evaluation of {:?} failed: {}", source, e.render()))
}
