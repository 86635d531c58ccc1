//! Tokenizer for condition expressions
//!
//! Single forward scan over the characters of the input. Positions are
//! character offsets, not byte offsets, so diagnostics line up with what the
//! author typed.

use serde::Serialize;
use std::fmt;

use super::errors::ExpressionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TokenKind {
    Number,
    String,
    True,
    False,
    Null,
    Identifier,
    EqEq,
    NotEq,
    GtEq,
    LtEq,
    AndAnd,
    OrOr,
    Gt,
    Lt,
    Bang,
    LParen,
    RParen,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::Number => "number",
            TokenKind::String => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Identifier => "identifier",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::GtEq => ">=",
            TokenKind::LtEq => "<=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            TokenKind::Gt => ">",
            TokenKind::Lt => "<",
            TokenKind::Bang => "!",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Eof => "end of input",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Decoded text: string contents without quotes, number digits, identifier name
    pub value: String,
    pub position: usize,
    pub length: usize,
}

impl Token {
    fn new(kind: TokenKind, value: impl Into<String>, position: usize, length: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            position,
            length,
        }
    }
}

/// Pull-mode tokenizer
///
/// Call [`Lexer::next_token`] repeatedly; once the input is exhausted every
/// further call yields an `Eof` token.
pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ExpressionError> {
        self.skip_whitespace();

        let Some(c) = self.peek() else {
            return Ok(Token::new(TokenKind::Eof, "", self.chars.len(), 0));
        };

        let start = self.pos;

        if c.is_ascii_digit() {
            return Ok(self.lex_number());
        }
        if c == '"' || c == '\'' {
            return self.lex_string(c);
        }
        if is_ident_start(c) {
            return Ok(self.lex_identifier());
        }

        // Two-character operators before their one-character prefixes
        if let Some(next) = self.peek_at(1) {
            let kind = match (c, next) {
                ('=', '=') => Some(TokenKind::EqEq),
                ('!', '=') => Some(TokenKind::NotEq),
                ('>', '=') => Some(TokenKind::GtEq),
                ('<', '=') => Some(TokenKind::LtEq),
                ('&', '&') => Some(TokenKind::AndAnd),
                ('|', '|') => Some(TokenKind::OrOr),
                _ => None,
            };
            if let Some(kind) = kind {
                self.pos += 2;
                let text: String = [c, next].iter().collect();
                return Ok(Token::new(kind, text, start, 2));
            }
        }

        let kind = match c {
            '>' => TokenKind::Gt,
            '<' => TokenKind::Lt,
            '!' => TokenKind::Bang,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            other => {
                return Err(ExpressionError::lex(
                    format!("unexpected character '{}' at position {}", other, start),
                    start,
                    self.input,
                ));
            }
        };
        self.pos += 1;
        Ok(Token::new(kind, c.to_string(), start, 1))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn lex_number(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        // A '.' only belongs to the number when a digit follows it
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        Token::new(TokenKind::Number, text, start, self.pos - start)
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, ExpressionError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = String::new();

        loop {
            let Some(c) = self.peek() else {
                return Err(ExpressionError::lex(
                    format!("unterminated string starting at position {}", start),
                    start,
                    self.input,
                ));
            };
            self.pos += 1;

            if c == quote {
                break;
            }

            if c == '\\' {
                let Some(escaped) = self.peek() else {
                    return Err(ExpressionError::lex(
                        format!("unterminated escape sequence in string starting at position {}", start),
                        start,
                        self.input,
                    ));
                };
                self.pos += 1;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                continue;
            }

            value.push(c);
        }

        Ok(Token::new(TokenKind::String, value, start, self.pos - start))
    }

    fn lex_identifier(&mut self) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_continue(c)) {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = match text.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier,
        };
        Token::new(kind, text, start, self.pos - start)
    }
}

/// Drain the whole input into a token list terminated by `Eof`
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}
