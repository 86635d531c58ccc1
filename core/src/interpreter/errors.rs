//! Expression errors
//!
//! Every error produced by the lexer, parser, evaluator or interpolator
//! carries the character offset and the original input so callers can point
//! at the offending position.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage that produced an expression error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionErrorKind {
    Lex,
    Parse,
    Eval,
}

impl fmt::Display for ExpressionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpressionErrorKind::Lex => write!(f, "lex"),
            ExpressionErrorKind::Parse => write!(f, "parse"),
            ExpressionErrorKind::Eval => write!(f, "evaluation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{kind} error at position {offset}: {message}")]
pub struct ExpressionError {
    pub kind: ExpressionErrorKind,
    pub message: String,
    /// Character offset into `input`
    pub offset: usize,
    pub input: String,
}

impl ExpressionError {
    pub fn lex(message: impl Into<String>, offset: usize, input: &str) -> Self {
        Self::new(ExpressionErrorKind::Lex, message, offset, input)
    }

    pub fn parse(message: impl Into<String>, offset: usize, input: &str) -> Self {
        Self::new(ExpressionErrorKind::Parse, message, offset, input)
    }

    pub fn eval(message: impl Into<String>, offset: usize, input: &str) -> Self {
        Self::new(ExpressionErrorKind::Eval, message, offset, input)
    }

    fn new(kind: ExpressionErrorKind, message: impl Into<String>, offset: usize, input: &str) -> Self {
        Self {
            kind,
            message: message.into(),
            offset,
            input: input.to_string(),
        }
    }

    /// Render the error with the input and a caret under the offending character
    ///
    /// ```text
    /// parse error at position 7: expected ')'
    ///   (1 == 1
    ///          ^
    /// ```
    pub fn render(&self) -> String {
        let caret_pad: String = self
            .input
            .chars()
            .take(self.offset)
            .map(|c| if c == '\t' { '\t' } else { ' ' })
            .collect();
        format!("{}\n  {}\n  {}^", self, self.input, caret_pad)
    }
}
