//! Variable scopes and dotted-path resolution
//!
//! Shared by the evaluator (identifiers) and the interpolator (`${...}`).

use std::collections::HashMap;
use std::fmt;

use super::values::Val;

/// Property names that are never traversed, in any position of a path
pub const FORBIDDEN_SEGMENTS: [&str; 3] = ["__proto__", "constructor", "prototype"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Params,
    Env,
    Selectors,
    Steps,
}

impl Scope {
    pub fn from_name(name: &str) -> Option<Scope> {
        match name {
            "params" => Some(Scope::Params),
            "env" => Some(Scope::Env),
            "selectors" => Some(Scope::Selectors),
            "steps" => Some(Scope::Steps),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Scope::Params => "params",
            Scope::Env => "env",
            Scope::Selectors => "selectors",
            Scope::Steps => "steps",
        };
        write!(f, "{}", s)
    }
}

/// The four variable namespaces visible to expressions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    pub params: HashMap<String, Val>,
    pub env: HashMap<String, Val>,
    pub selectors: HashMap<String, Val>,
    pub steps: HashMap<String, Val>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, scope: Scope) -> &HashMap<String, Val> {
        match scope {
            Scope::Params => &self.params,
            Scope::Env => &self.env,
            Scope::Selectors => &self.selectors,
            Scope::Steps => &self.steps,
        }
    }
}

/// Why a path could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    InvalidScope(String),
    ForbiddenSegment(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathError::InvalidScope(name) => write!(
                f,
                "invalid scope '{}' (expected params, env, selectors or steps)",
                name
            ),
            PathError::ForbiddenSegment(segment) => {
                write!(f, "access to property '{}' is not allowed", segment)
            }
        }
    }
}

/// Resolve `scope.a.b.c` against the variable context
///
/// Missing keys and `null`/`undefined` intermediates resolve to
/// `Val::Undefined`. Forbidden segments are rejected before any lookup.
pub fn resolve_path(path: &str, vars: &VariableContext) -> Result<Val, PathError> {
    let segments: Vec<&str> = path.split('.').collect();

    if let Some(bad) = segments.iter().find(|s| FORBIDDEN_SEGMENTS.contains(s)) {
        return Err(PathError::ForbiddenSegment(bad.to_string()));
    }

    let head = segments[0];
    let scope = Scope::from_name(head).ok_or_else(|| PathError::InvalidScope(head.to_string()))?;

    let Some((first, rest)) = segments[1..].split_first() else {
        return Ok(Val::Obj(vars.scope(scope).clone()));
    };

    let mut current = match vars.scope(scope).get(*first) {
        Some(v) => v,
        None => return Ok(Val::Undefined),
    };

    for (i, segment) in rest.iter().enumerate() {
        match property(current, segment) {
            Property::Borrowed(next) => current = next,
            // Computed properties are leaves
            Property::Owned(v) if i + 1 == rest.len() => return Ok(v),
            Property::Owned(_) | Property::Missing => return Ok(Val::Undefined),
        }
    }

    Ok(current.clone())
}

enum Property<'a> {
    Borrowed(&'a Val),
    Owned(Val),
    Missing,
}

fn property<'a>(value: &'a Val, segment: &str) -> Property<'a> {
    match value {
        Val::Obj(map) => map.get(segment).map_or(Property::Missing, Property::Borrowed),
        Val::List(items) if segment == "length" => Property::Owned(Val::Num(items.len() as f64)),
        Val::List(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|idx| items.get(idx))
            .map_or(Property::Missing, Property::Borrowed),
        Val::Str(s) if segment == "length" => Property::Owned(Val::Num(s.chars().count() as f64)),
        _ => Property::Missing,
    }
}
