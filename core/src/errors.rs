//! Action-level errors
//!
//! Every failure carries the fully-qualified action name and, when one was
//! running, the step index. [`Severity`] decides whether `onError` and
//! retries get a say.

use serde::Serialize;
use std::fmt;

use crate::interpreter::ExpressionError;

/* ===================== Driver Errors ===================== */

/// Failures reported by the page driver or the selector resolver
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("selector not found: {0}")]
    SelectorNotFound(String),
    #[error("driver timed out after {0}ms")]
    Timeout(u64),
    #[error("{0}")]
    Failed(String),
}

impl From<DriverError> for ErrorKind {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::ElementNotFound(s) => ErrorKind::ElementNotFound(s),
            DriverError::SelectorNotFound(s) => ErrorKind::SelectorNotFound(s),
            DriverError::Timeout(after_ms) => ErrorKind::Timeout {
                scope: TimeoutScope::Step,
                after_ms,
            },
            DriverError::Failed(message) => ErrorKind::Driver(message),
        }
    }
}

/* ===================== Error Kinds ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutScope {
    Step,
    Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Stops the action, bypassing retries and `onError`
    Fatal,
    /// Subject to retries and `onError`
    Recoverable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum ErrorKind {
    ActionNotFound(String),
    /// Parameter or env binding rejected before any step ran
    Validation(String),
    /// A step handler rejected its arguments
    InvalidArgument(String),
    ElementNotFound(String),
    SelectorNotFound(String),
    Timeout { scope: TimeoutScope, after_ms: u64 },
    /// A step failed and was not recovered; wraps the underlying cause
    StepFailed { cause: Box<ActionError> },
    VerifyFailed(String),
    Expression(ExpressionError),
    MaxDepthExceeded(usize),
    MaxStepsExceeded(usize),
    Driver(String),
    Cancelled,
}

impl ErrorKind {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ActionNotFound(_) => "ACTION_NOT_FOUND",
            ErrorKind::Validation(_) => "VALIDATION_ERROR",
            ErrorKind::InvalidArgument(_) => "INVALID_ARGUMENT",
            ErrorKind::ElementNotFound(_) => "ELEMENT_NOT_FOUND",
            ErrorKind::SelectorNotFound(_) => "SELECTOR_NOT_FOUND",
            ErrorKind::Timeout { .. } => "TIMEOUT",
            ErrorKind::StepFailed { .. } => "STEP_FAILED",
            ErrorKind::VerifyFailed(_) => "VERIFY_FAILED",
            ErrorKind::Expression(_) => "EXPRESSION_ERROR",
            ErrorKind::MaxDepthExceeded(_) => "MAX_DEPTH_EXCEEDED",
            ErrorKind::MaxStepsExceeded(_) => "MAX_STEPS_EXCEEDED",
            ErrorKind::Driver(_) => "DRIVER_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ErrorKind::ActionNotFound(_)
            | ErrorKind::Validation(_)
            | ErrorKind::VerifyFailed(_)
            | ErrorKind::Expression(_)
            | ErrorKind::MaxDepthExceeded(_)
            | ErrorKind::MaxStepsExceeded(_)
            | ErrorKind::Cancelled
            | ErrorKind::Timeout {
                scope: TimeoutScope::Action,
                ..
            } => Severity::Fatal,
            ErrorKind::InvalidArgument(_)
            | ErrorKind::ElementNotFound(_)
            | ErrorKind::SelectorNotFound(_)
            | ErrorKind::Timeout {
                scope: TimeoutScope::Step,
                ..
            }
            | ErrorKind::StepFailed { .. }
            | ErrorKind::Driver(_) => Severity::Recoverable,
        }
    }

    /// Kinds that cross a nested `run` boundary unchanged
    fn escapes_nesting(&self) -> bool {
        matches!(
            self,
            ErrorKind::ActionNotFound(_)
                | ErrorKind::MaxDepthExceeded(_)
                | ErrorKind::MaxStepsExceeded(_)
                | ErrorKind::Cancelled
                | ErrorKind::Timeout {
                    scope: TimeoutScope::Action,
                    ..
                }
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ActionNotFound(name) => write!(f, "action '{}' not found", name),
            ErrorKind::Validation(message) => write!(f, "validation failed: {}", message),
            ErrorKind::InvalidArgument(message) => write!(f, "invalid argument: {}", message),
            ErrorKind::ElementNotFound(selector) => write!(f, "element not found: {}", selector),
            ErrorKind::SelectorNotFound(selector) => {
                write!(f, "selector not found: {}", selector)
            }
            ErrorKind::Timeout { scope, after_ms } => {
                let scope = match scope {
                    TimeoutScope::Step => "step",
                    TimeoutScope::Action => "action",
                };
                write!(f, "{} timed out after {}ms", scope, after_ms)
            }
            ErrorKind::StepFailed { cause } => write!(f, "step failed: {}", cause),
            ErrorKind::VerifyFailed(message) => write!(f, "verification failed: {}", message),
            ErrorKind::Expression(err) => write!(f, "{}", err),
            ErrorKind::MaxDepthExceeded(max) => {
                write!(f, "maximum nesting depth of {} exceeded", max)
            }
            ErrorKind::MaxStepsExceeded(max) => write!(f, "maximum of {} steps exceeded", max),
            ErrorKind::Driver(message) => write!(f, "driver error: {}", message),
            ErrorKind::Cancelled => write!(f, "execution cancelled"),
        }
    }
}

/* ===================== Action Error ===================== */

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionError {
    #[serde(flatten)]
    pub kind: ErrorKind,
    /// Fully-qualified name of the action that raised the error
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

impl ActionError {
    pub fn new(kind: ErrorKind, action: impl Into<String>, step: Option<usize>) -> Self {
        Self {
            kind,
            action: action.into(),
            step,
        }
    }

    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    /// Character offset into the failing expression, for expression errors
    pub fn offset(&self) -> Option<usize> {
        match &self.kind {
            ErrorKind::Expression(err) => Some(err.offset),
            _ => None,
        }
    }

    /// Terminal form of an unrecovered step failure
    ///
    /// Fatal errors are returned as they are. A cause that is already a
    /// `StepFailed` for this same step is not wrapped twice.
    pub fn into_step_failure(self, action: &str, step: usize) -> ActionError {
        if self.is_fatal() {
            return self;
        }
        if matches!(self.kind, ErrorKind::StepFailed { .. })
            && self.action == action
            && self.step == Some(step)
        {
            return self;
        }
        ActionError::new(
            ErrorKind::StepFailed {
                cause: Box::new(self),
            },
            action,
            Some(step),
        )
    }

    /// Re-raise a nested action's failure as the failure of the calling `run` step
    pub fn into_parent(self, action: &str, step: usize) -> ActionError {
        if self.kind.escapes_nesting() {
            return self;
        }
        ActionError::new(
            ErrorKind::StepFailed {
                cause: Box::new(self),
            },
            action,
            Some(step),
        )
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{} step {}] {}", self.action, step, self.kind),
            None => write!(f, "[{}] {}", self.action, self.kind),
        }
    }
}

impl std::error::Error for ActionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Expression(err) => Some(err),
            ErrorKind::StepFailed { cause } => Some(cause.as_ref()),
            _ => None,
        }
    }
}
