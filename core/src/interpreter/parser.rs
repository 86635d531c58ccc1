//! Recursive-descent parser for condition expressions
//!
//! Precedence, lowest first:
//!
//! ```text
//! or_expr     = and_expr ( "||" and_expr )*
//! and_expr    = equality ( "&&" equality )*
//! equality    = comparison ( ("==" | "!=") comparison )*
//! comparison  = unary ( (">" | "<" | ">=" | "<=") unary )*
//! unary       = "!" unary | primary
//! primary     = number | string | true | false | null | identifier | "(" or_expr ")"
//! ```

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::errors::ExpressionError;
use super::lexer::{tokenize, Token, TokenKind};

/// Maximum nesting of parentheses and `!` the parser will recurse through
const MAX_NESTING: usize = 256;

/// Parse an expression string into an AST
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        pos: 0,
        nesting: 0,
    };

    if parser.peek().kind == TokenKind::Eof {
        return Err(ExpressionError::parse("empty expression", 0, input));
    }

    let expr = parser.parse_or_expr()?;

    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(ExpressionError::parse(
            format!("unexpected token '{}' after end of expression", trailing.value),
            trailing.position,
            input,
        ));
    }

    Ok(expr)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // tokenize() always terminates the list with Eof
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, token: &Token, message: impl Into<String>) -> ExpressionError {
        ExpressionError::parse(message, token.position, self.input)
    }

    fn enter(&mut self, at: &Token) -> Result<(), ExpressionError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error_at(
                at,
                format!("expression nested deeper than {} levels", MAX_NESTING),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    fn parse_or_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and_expr()?;
        while self.peek().kind == TokenKind::OrOr {
            let op = self.advance();
            let right = self.parse_and_expr()?;
            left = binary(BinaryOp::Or, left, right, op.position);
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_equality()?;
        while self.peek().kind == TokenKind::AndAnd {
            let op = self.advance();
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right, op.position);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_comparison()?;
            left = binary(op, left, right, token.position);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::GtEq => BinaryOp::GtEq,
                TokenKind::LtEq => BinaryOp::LtEq,
                _ => break,
            };
            let token = self.advance();
            let right = self.parse_unary()?;
            left = binary(op, left, right, token.position);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek().kind == TokenKind::Bang {
            let bang = self.advance();
            self.enter(&bang)?;
            let operand = self.parse_unary();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
                pos: bang.position,
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number => {
                let value = token.value.parse::<f64>().map_err(|_| {
                    self.error_at(&token, format!("invalid number '{}'", token.value))
                })?;
                Ok(Expr::Number {
                    value,
                    pos: token.position,
                })
            }
            TokenKind::String => Ok(Expr::Str {
                value: token.value,
                pos: token.position,
            }),
            TokenKind::True => Ok(Expr::Bool {
                value: true,
                pos: token.position,
            }),
            TokenKind::False => Ok(Expr::Bool {
                value: false,
                pos: token.position,
            }),
            TokenKind::Null => Ok(Expr::Null {
                pos: token.position,
            }),
            TokenKind::Identifier => Ok(Expr::Identifier {
                name: token.value,
                pos: token.position,
            }),
            TokenKind::LParen => {
                self.enter(&token)?;
                let inner = self.parse_or_expr();
                self.leave();
                let inner = inner?;
                let closing = self.peek().clone();
                if closing.kind != TokenKind::RParen {
                    return Err(self.error_at(
                        &closing,
                        format!(
                            "expected ')' to close '(' at position {}, found {}",
                            token.position, closing.kind
                        ),
                    ));
                }
                self.advance();
                Ok(inner)
            }
            TokenKind::Eof => Err(self.error_at(&token, "unexpected end of expression")),
            _ => Err(self.error_at(&token, format!("unexpected token '{}'", token.value))),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr, pos: usize) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
        pos,
    }
}
