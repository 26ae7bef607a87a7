//! Recursive-descent parser for the native HCL syntax.
//!
//! Transforms a token stream from [`crate::lexer`] into a [`Body`]. The
//! grammar covers attributes, labeled blocks, literals, collections,
//! traversals, index access, function calls, and templates. Operator and
//! conditional expressions are parsed into an opaque
//! [`Expression::Operation`]; `for` expressions are skipped as a balanced
//! token run.

use std::path::Path;

use crate::SyntaxError;
use crate::ast::{Attribute, Block, Body, Expression, TemplatePart};
use crate::json;
use crate::lexer::{self, StrPart, Token};

/// Source dialect of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Native HCL syntax (`.hcl`, `.tf`, `.tofu`).
    Native,
    /// JSON syntax (`.hcl.json`, `.tf.json`, `.tofu.json`).
    Json,
}

impl Dialect {
    /// Picks the dialect from a file name.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::Json
        } else {
            Self::Native
        }
    }
}

/// A reusable parser. Its token buffer is kept between parses so pooled
/// instances avoid reallocating.
#[derive(Debug, Default)]
pub struct Parser {
    tokens: Vec<Token>,
    files_parsed: usize,
}

impl Parser {
    /// Creates a parser with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `source` in the given dialect.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] describing the first syntax problem.
    pub fn parse(&mut self, source: &str, dialect: Dialect) -> Result<Body, SyntaxError> {
        self.files_parsed += 1;
        match dialect {
            Dialect::Json => json::parse_json(source),
            Dialect::Native => {
                lexer::tokenize_into(source, &mut self.tokens)?;
                let mut cursor = TokenCursor::new(&self.tokens);
                let body = parse_body(&mut cursor, false)?;
                Ok(body)
            }
        }
    }

    /// Clears per-parse state before the parser is reused.
    pub fn reset(&mut self) {
        self.tokens.clear();
    }

    /// Number of parse calls served by this instance.
    #[must_use]
    pub const fn files_parsed(&self) -> usize {
        self.files_parsed
    }
}

/// Parses native HCL source with a throwaway parser.
///
/// # Errors
///
/// Returns a [`SyntaxError`] describing the first syntax problem.
pub fn parse_hcl(source: &str) -> Result<Body, SyntaxError> {
    Parser::new().parse(source, Dialect::Native)
}

/// Cursor into a token stream for recursive-descent parsing.
struct TokenCursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    const fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect_token(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(syntax_err(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn syntax_err(message: String) -> SyntaxError {
    SyntaxError { message }
}

fn parse_body(cursor: &mut TokenCursor<'_>, nested: bool) -> Result<Body, SyntaxError> {
    let mut body = Body::default();

    loop {
        match cursor.peek() {
            None if nested => {
                return Err(syntax_err("unexpected end of input inside block".into()));
            }
            None => break,
            Some(Token::BraceClose) if nested => break,
            Some(Token::Identifier(name)) => {
                let _ = cursor.advance();
                if cursor.eat(&Token::Equals) {
                    let expr = parse_expression(cursor)?;
                    body.attributes.push(Attribute {
                        name: name.clone(),
                        expr,
                    });
                } else {
                    body.blocks.push(parse_block(cursor, name.clone())?);
                }
            }
            Some(other) => {
                return Err(syntax_err(format!(
                    "expected attribute or block, got {other:?}"
                )));
            }
        }
    }

    Ok(body)
}

fn parse_block(cursor: &mut TokenCursor<'_>, kind: String) -> Result<Block, SyntaxError> {
    let mut labels = Vec::new();
    loop {
        match cursor.advance() {
            Some(Token::BraceOpen) => break,
            Some(Token::Identifier(label)) => labels.push(label.clone()),
            Some(Token::Str(parts)) => match parts.as_slice() {
                [StrPart::Literal(label)] => labels.push(label.clone()),
                _ => {
                    return Err(syntax_err(format!(
                        "block labels of {kind} must be literal strings"
                    )));
                }
            },
            other => {
                return Err(syntax_err(format!(
                    "expected block label or {{ after {kind}, got {other:?}"
                )));
            }
        }
    }
    let body = parse_body(cursor, true)?;
    cursor.expect_token(&Token::BraceClose)?;
    Ok(Block { kind, labels, body })
}

fn parse_expression(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    let first = parse_unary(cursor)?;
    let mut operands = Vec::new();

    loop {
        match cursor.peek() {
            Some(Token::Operator(op)) if op != "=>" && op != "..." && op != "!" => {
                let _ = cursor.advance();
                if operands.is_empty() {
                    operands.push(first.clone());
                }
                operands.push(parse_unary(cursor)?);
            }
            Some(Token::Question) => {
                let _ = cursor.advance();
                if operands.is_empty() {
                    operands.push(first.clone());
                }
                operands.push(parse_expression(cursor)?);
                cursor.expect_token(&Token::Colon)?;
                operands.push(parse_expression(cursor)?);
                break;
            }
            _ => break,
        }
    }

    if operands.is_empty() {
        Ok(first)
    } else {
        Ok(Expression::Operation(operands))
    }
}

fn parse_unary(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    match cursor.peek() {
        Some(Token::Operator(op)) if op == "-" || op == "!" => {
            let _ = cursor.advance();
            let operand = parse_unary(cursor)?;
            Ok(Expression::Operation(vec![operand]))
        }
        _ => parse_postfix(cursor),
    }
}

fn parse_postfix(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    let mut expr = parse_primary(cursor)?;

    loop {
        match cursor.peek() {
            Some(Token::Dot) => {
                let _ = cursor.advance();
                let step = match cursor.advance() {
                    Some(Token::Identifier(name)) => name.clone(),
                    Some(Token::Number(n)) => n.clone(),
                    Some(Token::Operator(op)) if op == "*" => "*".to_string(),
                    other => {
                        return Err(syntax_err(format!(
                            "expected attribute name after '.', got {other:?}"
                        )));
                    }
                };
                expr = match expr {
                    Expression::Traversal(mut steps) => {
                        steps.push(step);
                        Expression::Traversal(steps)
                    }
                    other => Expression::Index {
                        collection: Box::new(other),
                        key: Box::new(Expression::String(step)),
                    },
                };
            }
            Some(Token::BracketOpen) => {
                let _ = cursor.advance();
                let key = if matches!(cursor.peek(), Some(Token::Operator(op)) if op == "*") {
                    let _ = cursor.advance();
                    Expression::String("*".into())
                } else {
                    parse_expression(cursor)?
                };
                cursor.expect_token(&Token::BracketClose)?;
                expr = Expression::Index {
                    collection: Box::new(expr),
                    key: Box::new(key),
                };
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn parse_primary(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    match cursor.advance() {
        Some(Token::Str(parts)) => string_expression(parts),
        Some(Token::Number(raw)) => raw
            .parse::<f64>()
            .map(Expression::Number)
            .map_err(|_| syntax_err(format!("invalid number literal: {raw}"))),
        Some(Token::True) => Ok(Expression::Bool(true)),
        Some(Token::False) => Ok(Expression::Bool(false)),
        Some(Token::Null) => Ok(Expression::Null),
        Some(Token::Identifier(name)) => {
            if cursor.eat(&Token::ParenOpen) {
                let args = parse_call_args(cursor)?;
                Ok(Expression::Call {
                    name: name.clone(),
                    args,
                })
            } else {
                Ok(Expression::Traversal(vec![name.clone()]))
            }
        }
        Some(Token::BracketOpen) => {
            if matches!(cursor.peek(), Some(Token::Identifier(k)) if k == "for") {
                skip_balanced(cursor, &Token::BracketOpen, &Token::BracketClose)?;
                return Ok(Expression::Operation(Vec::new()));
            }
            parse_list(cursor)
        }
        Some(Token::BraceOpen) => {
            if matches!(cursor.peek(), Some(Token::Identifier(k)) if k == "for") {
                skip_balanced(cursor, &Token::BraceOpen, &Token::BraceClose)?;
                return Ok(Expression::Operation(Vec::new()));
            }
            parse_object(cursor)
        }
        Some(Token::ParenOpen) => {
            let inner = parse_expression(cursor)?;
            cursor.expect_token(&Token::ParenClose)?;
            Ok(inner)
        }
        other => Err(syntax_err(format!("expected expression, got {other:?}"))),
    }
}

fn parse_call_args(cursor: &mut TokenCursor<'_>) -> Result<Vec<Expression>, SyntaxError> {
    let mut args = Vec::new();
    while !cursor.eat(&Token::ParenClose) {
        if cursor.peek().is_none() {
            return Err(syntax_err("unexpected end of input inside call".into()));
        }
        args.push(parse_expression(cursor)?);
        let _ = cursor.eat(&Token::Operator("...".into()));
        let _ = cursor.eat(&Token::Comma);
    }
    Ok(args)
}

fn parse_list(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    let mut items = Vec::new();
    while !cursor.eat(&Token::BracketClose) {
        if cursor.peek().is_none() {
            return Err(syntax_err("unexpected end of input inside list".into()));
        }
        items.push(parse_expression(cursor)?);
        let _ = cursor.eat(&Token::Comma);
    }
    Ok(Expression::List(items))
}

fn parse_object(cursor: &mut TokenCursor<'_>) -> Result<Expression, SyntaxError> {
    let mut entries = Vec::new();
    while !cursor.eat(&Token::BraceClose) {
        let key = match cursor.advance() {
            Some(Token::Identifier(name)) => name.clone(),
            Some(Token::Str(parts)) => match parts.as_slice() {
                [StrPart::Literal(key)] => key.clone(),
                _ => String::new(),
            },
            Some(Token::ParenOpen) => {
                let _ = parse_expression(cursor)?;
                cursor.expect_token(&Token::ParenClose)?;
                String::new()
            }
            None => return Err(syntax_err("unexpected end of input inside object".into())),
            other => return Err(syntax_err(format!("expected object key, got {other:?}"))),
        };
        if !cursor.eat(&Token::Equals) {
            cursor.expect_token(&Token::Colon)?;
        }
        let value = parse_expression(cursor)?;
        entries.push((key, value));
        let _ = cursor.eat(&Token::Comma);
    }
    Ok(Expression::Object(entries))
}

fn skip_balanced(
    cursor: &mut TokenCursor<'_>,
    open: &Token,
    close: &Token,
) -> Result<(), SyntaxError> {
    let mut depth = 1usize;
    while depth > 0 {
        match cursor.advance() {
            Some(tok) if tok == open => depth += 1,
            Some(tok) if tok == close => depth -= 1,
            Some(_) => {}
            None => return Err(syntax_err("unterminated for expression".into())),
        }
    }
    Ok(())
}

/// Converts lexer string parts into a plain string or a template.
pub(crate) fn string_expression(parts: &[StrPart]) -> Result<Expression, SyntaxError> {
    if let [StrPart::Literal(text)] = parts {
        return Ok(Expression::String(text.clone()));
    }
    let mut template = Vec::with_capacity(parts.len());
    for part in parts {
        match part {
            StrPart::Literal(text) => template.push(TemplatePart::Literal(text.clone())),
            StrPart::Interpolation(source) => {
                let trimmed = source.trim().trim_start_matches('~').trim_end_matches('~');
                let tokens = lexer::tokenize(trimmed)?;
                let mut inner = TokenCursor::new(&tokens);
                let expr = parse_expression(&mut inner)?;
                if let Some(extra) = inner.peek() {
                    return Err(syntax_err(format!(
                        "unexpected {extra:?} in interpolation \"{trimmed}\""
                    )));
                }
                template.push(TemplatePart::Interpolation(expr));
            }
        }
    }
    Ok(Expression::Template(template))
}
