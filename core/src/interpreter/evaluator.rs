//! Expression evaluation
//!
//! Walks the AST against a [`VariableContext`]. Evaluation never has side
//! effects; the only failures are invalid scopes, forbidden properties and
//! exceeding the depth limit.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::errors::ExpressionError;
use super::parser::parse_expression;
use super::scope::{resolve_path, VariableContext};
use super::values::Val;

pub const DEFAULT_MAX_DEPTH: usize = 50;

#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    max_depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Evaluator {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Evaluate a parsed expression
    ///
    /// `source` is only used to attach the original text to errors.
    pub fn evaluate(
        &self,
        expr: &Expr,
        vars: &VariableContext,
        source: &str,
    ) -> Result<Val, ExpressionError> {
        self.eval_node(expr, vars, source, 0)
    }

    /// Parse and evaluate in one go
    pub fn evaluate_str(&self, source: &str, vars: &VariableContext) -> Result<Val, ExpressionError> {
        let expr = parse_expression(source)?;
        self.evaluate(&expr, vars, source)
    }

    /// Parse, evaluate and reduce to a boolean with the usual truthiness rules
    pub fn evaluate_condition(
        &self,
        source: &str,
        vars: &VariableContext,
    ) -> Result<bool, ExpressionError> {
        Ok(self.evaluate_str(source, vars)?.to_bool())
    }

    fn eval_node(
        &self,
        expr: &Expr,
        vars: &VariableContext,
        source: &str,
        depth: usize,
    ) -> Result<Val, ExpressionError> {
        if depth > self.max_depth {
            return Err(ExpressionError::eval(
                format!("maximum expression depth of {} exceeded", self.max_depth),
                expr.pos(),
                source,
            ));
        }

        match expr {
            Expr::Number { value, .. } => Ok(Val::Num(*value)),
            Expr::Str { value, .. } => Ok(Val::Str(value.clone())),
            Expr::Bool { value, .. } => Ok(Val::Bool(*value)),
            Expr::Null { .. } => Ok(Val::Null),

            Expr::Identifier { name, pos } => resolve_path(name, vars)
                .map_err(|e| ExpressionError::eval(e.to_string(), *pos, source)),

            Expr::Unary {
                op: UnaryOp::Not,
                operand,
                ..
            } => {
                let v = self.eval_node(operand, vars, source, depth + 1)?;
                Ok(Val::Bool(!v.to_bool()))
            }

            Expr::Binary {
                op, left, right, ..
            } => {
                let l = self.eval_node(left, vars, source, depth + 1)?;

                // Logical operators hand back an operand, not a coerced boolean
                match op {
                    BinaryOp::And if !l.to_bool() => Ok(l),
                    BinaryOp::Or if l.to_bool() => Ok(l),
                    BinaryOp::And | BinaryOp::Or => self.eval_node(right, vars, source, depth + 1),
                    BinaryOp::Eq => {
                        let r = self.eval_node(right, vars, source, depth + 1)?;
                        Ok(Val::Bool(l.loose_eq(&r)))
                    }
                    BinaryOp::NotEq => {
                        let r = self.eval_node(right, vars, source, depth + 1)?;
                        Ok(Val::Bool(!l.loose_eq(&r)))
                    }
                    BinaryOp::Gt | BinaryOp::Lt | BinaryOp::GtEq | BinaryOp::LtEq => {
                        let r = self.eval_node(right, vars, source, depth + 1)?;
                        Ok(Val::Bool(numeric_order(*op, &l, &r)))
                    }
                }
            }
        }
    }
}

/// Ordering comparison; `false` whenever either side is not a number
fn numeric_order(op: BinaryOp, l: &Val, r: &Val) -> bool {
    let (a, b) = (l.to_number(), r.to_number());
    if a.is_nan() || b.is_nan() {
        return false;
    }
    match op {
        BinaryOp::Gt => a > b,
        BinaryOp::Lt => a < b,
        BinaryOp::GtEq => a >= b,
        BinaryOp::LtEq => a <= b,
        _ => false,
    }
}

/// Parse and evaluate with the default depth limit
pub fn evaluate(source: &str, vars: &VariableContext) -> Result<Val, ExpressionError> {
    Evaluator::default().evaluate_str(source, vars)
}
