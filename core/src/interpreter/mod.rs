//! # Condition expression language
//!
//! A deliberately small, side-effect free language for step conditions,
//! verification checks and return values:
//!
//! ```text
//! steps.login.ok && (params.retries >= 2 || !env.CI)
//! ```
//!
//! Literals (numbers, strings, `true`, `false`, `null`), dotted identifiers
//! rooted in one of the four scopes (`params`, `env`, `selectors`, `steps`),
//! `!`, comparisons, `==`/`!=`, `&&`, `||` and parentheses. No loops,
//! assignments or calls.
//!
//! Separately, [`interpolate`] substitutes `${scope.path}` references inside
//! arbitrary step arguments.

pub mod ast;
pub mod errors;
pub mod evaluator;
pub mod interpolate;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod values;

#[cfg(test)]
mod tests;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use errors::{ExpressionError, ExpressionErrorKind};
pub use evaluator::{evaluate, Evaluator, DEFAULT_MAX_DEPTH};
pub use interpolate::{interpolate_string, interpolate_value, pure_reference, resolve_pure};
pub use lexer::{tokenize, Lexer, Token, TokenKind};
pub use parser::parse_expression;
pub use scope::{resolve_path, PathError, Scope, VariableContext, FORBIDDEN_SEGMENTS};
pub use values::{json_to_val_map, Val};
