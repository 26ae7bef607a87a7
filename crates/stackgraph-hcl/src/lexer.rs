//! Tokenization of HCL source text using `nom`.
//!
//! Produces a stream of [`Token`]s from raw input for the parser to
//! consume. Whitespace, newlines and `#`, `//`, `/* */` comments are
//! discarded between tokens. String literals are split into literal and
//! interpolation parts here; interpolation sources are re-tokenized by
//! the parser.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, multispace1, not_line_ending},
    combinator::value,
    multi::many0,
    sequence::{delimited, preceded},
};

use crate::SyntaxError;

/// A segment of a string token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrPart {
    /// Literal text with escapes already applied.
    Literal(String),
    /// Raw source of a `${...}` interpolation, without the delimiters.
    Interpolation(String),
}

/// A token in the HCL language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Boolean literal `true`.
    True,
    /// Boolean literal `false`.
    False,
    /// `null`.
    Null,
    /// An identifier (attribute name, block type, variable root).
    Identifier(String),
    /// A quoted string or heredoc.
    Str(Vec<StrPart>),
    /// A numeric literal in source form.
    Number(String),
    /// `{` opening brace.
    BraceOpen,
    /// `}` closing brace.
    BraceClose,
    /// `[` opening bracket.
    BracketOpen,
    /// `]` closing bracket.
    BracketClose,
    /// `(` opening parenthesis.
    ParenOpen,
    /// `)` closing parenthesis.
    ParenClose,
    /// `=` assignment.
    Equals,
    /// `:` object key separator or conditional branch separator.
    Colon,
    /// `,` separator.
    Comma,
    /// `.` attribute access.
    Dot,
    /// `?` conditional.
    Question,
    /// Arithmetic, comparison, or logical operator.
    Operator(String),
}

/// Skippable items: whitespace or comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    let hash_comment = value((), preceded(tag("#"), not_line_ending));
    let line_comment = value((), preceded(tag("//"), not_line_ending));
    let block_comment = value((), delimited(tag("/*"), take_until("*/"), tag("*/")));
    let ws = value((), multispace1);
    let (input, _) = many0(alt((ws, hash_comment, line_comment, block_comment))).parse(input)?;
    Ok((input, ()))
}

fn failure(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Char))
}

/// Scans a `${...}` interpolation body starting right after `${`.
///
/// Returns the raw body and the byte length consumed including the
/// closing brace. Nested braces and quoted strings are skipped.
fn scan_interpolation(input: &str) -> Option<(String, usize)> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in input.char_indices() {
        if in_string {
            match (escaped, c) {
                (true, _) => escaped = false,
                (false, '\\') => escaped = true,
                (false, '"') => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' if depth == 0 => return Some((input[..idx].to_string(), idx + 1)),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Splits already-unescaped text into literal and interpolation parts.
///
/// Used for JSON-dialect strings, where every string is a template.
///
/// # Errors
///
/// Returns a [`SyntaxError`] for an unterminated `${`.
pub fn template_parts(text: &str) -> Result<Vec<StrPart>, SyntaxError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(idx) = rest.find('$') {
        literal.push_str(&rest[..idx]);
        let tail = &rest[idx..];
        if let Some(after) = tail.strip_prefix("$${") {
            literal.push_str("${");
            rest = after;
        } else if let Some(after) = tail.strip_prefix("${") {
            let (body, consumed) = scan_interpolation(after).ok_or_else(|| SyntaxError {
                message: format!("unterminated interpolation in \"{text}\""),
            })?;
            if !literal.is_empty() {
                parts.push(StrPart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(StrPart::Interpolation(body));
            rest = &after[consumed..];
        } else {
            literal.push('$');
            rest = &tail[1..];
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() || parts.is_empty() {
        parts.push(StrPart::Literal(literal));
    }
    Ok(parts)
}

/// Parses a double-quoted string literal with escapes and interpolations.
fn string_literal(input: &str) -> IResult<&str, Token> {
    let (input, _) = char('"')(input)?;
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut pos = 0usize;

    loop {
        let rest = &input[pos..];
        let mut chars = rest.chars();
        let Some(c) = chars.next() else {
            return Err(failure(input));
        };
        match c {
            '"' => {
                if !literal.is_empty() || parts.is_empty() {
                    parts.push(StrPart::Literal(literal));
                }
                return Ok((&input[pos + 1..], Token::Str(parts)));
            }
            '\\' => {
                let escaped = chars.next().ok_or_else(|| failure(input))?;
                match escaped {
                    'n' => literal.push('\n'),
                    't' => literal.push('\t'),
                    'r' => literal.push('\r'),
                    '\\' => literal.push('\\'),
                    '"' => literal.push('"'),
                    other => {
                        literal.push('\\');
                        literal.push(other);
                    }
                }
                pos += 1 + escaped.len_utf8();
            }
            '$' if rest.starts_with("$${") => {
                literal.push_str("${");
                pos += 3;
            }
            '$' if rest.starts_with("${") => {
                let (body, consumed) = scan_interpolation(&rest[2..]).ok_or_else(|| failure(input))?;
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(StrPart::Interpolation(body));
                pos += 2 + consumed;
            }
            '\n' => return Err(failure(input)),
            other => {
                literal.push(other);
                pos += other.len_utf8();
            }
        }
    }
}

/// Parses a heredoc (`<<EOF` or `<<-EOF`) into a single literal.
fn heredoc(input: &str) -> IResult<&str, Token> {
    let (input, _) = tag("<<")(input)?;
    let (input, indent) = take_while(|c: char| c == '-')(input)?;
    let (input, marker) = take_while1(is_ident_continue)(input)?;
    let Some(newline) = input.find('\n') else {
        return Err(failure(input));
    };
    let mut remaining = &input[newline + 1..];
    let mut lines: Vec<&str> = Vec::new();
    loop {
        let (line, rest, has_more) = match remaining.split_once('\n') {
            Some((line, rest)) => (line, rest, true),
            None => (remaining, "", false),
        };
        if line.trim() == marker {
            let content = if indent.is_empty() {
                lines.join("\n")
            } else {
                lines.iter().map(|l| l.trim_start()).collect::<Vec<_>>().join("\n")
            };
            return Ok((&remaining[line.len()..], Token::Str(vec![StrPart::Literal(content)])));
        }
        if !has_more {
            return Err(failure(remaining));
        }
        lines.push(line);
        remaining = rest;
    }
}

/// Parses a numeric literal: digits with an optional fraction and exponent.
fn number_literal(input: &str) -> IResult<&str, Token> {
    let (mut rest, digits) = take_while1(|c: char| c.is_ascii_digit())(input)?;
    let mut len = digits.len();
    if let Some(frac) = rest.strip_prefix('.') {
        let frac_len = frac.chars().take_while(char::is_ascii_digit).count();
        if frac_len > 0 {
            len += 1 + frac_len;
            rest = &frac[frac_len..];
        }
    }
    if let Some(exp) = rest.strip_prefix(['e', 'E']) {
        let signed = exp.strip_prefix(['+', '-']).unwrap_or(exp);
        let exp_len = signed.chars().take_while(char::is_ascii_digit).count();
        if exp_len > 0 {
            let sign_len = exp.len() - signed.len();
            len += 1 + sign_len + exp_len;
            rest = &signed[exp_len..];
        }
    }
    Ok((rest, Token::Number(input[..len].to_string())))
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parses an identifier or keyword literal.
fn identifier_or_keyword(input: &str) -> IResult<&str, Token> {
    let (input, first) = take_while1(is_ident_start)(input)?;
    let (input, rest) = take_while(is_ident_continue)(input)?;
    let word = format!("{first}{rest}");
    let token = match word.as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Identifier(word),
    };
    Ok((input, token))
}

fn operator(text: &str) -> Token {
    Token::Operator(text.to_string())
}

/// Parses a symbol or operator token.
fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        alt((
            value(operator("=="), tag("==")),
            value(operator("!="), tag("!=")),
            value(operator("<="), tag("<=")),
            value(operator(">="), tag(">=")),
            value(operator("&&"), tag("&&")),
            value(operator("||"), tag("||")),
            value(operator("=>"), tag("=>")),
            value(operator("..."), tag("...")),
        )),
        alt((
            value(Token::BraceOpen, char('{')),
            value(Token::BraceClose, char('}')),
            value(Token::BracketOpen, char('[')),
            value(Token::BracketClose, char(']')),
            value(Token::ParenOpen, char('(')),
            value(Token::ParenClose, char(')')),
            value(Token::Equals, char('=')),
            value(Token::Colon, char(':')),
            value(Token::Comma, char(',')),
            value(Token::Dot, char('.')),
            value(Token::Question, char('?')),
        )),
        alt((
            value(operator("+"), char('+')),
            value(operator("-"), char('-')),
            value(operator("*"), char('*')),
            value(operator("/"), char('/')),
            value(operator("%"), char('%')),
            value(operator("<"), char('<')),
            value(operator(">"), char('>')),
            value(operator("!"), char('!')),
        )),
    ))
    .parse(input)
}

/// Parses a single token (after trivia has been skipped).
fn single_token(input: &str) -> IResult<&str, Token> {
    alt((
        string_literal,
        heredoc,
        number_literal,
        identifier_or_keyword,
        symbol,
    ))
    .parse(input)
}

/// Tokenizes HCL source into `tokens`, reusing the vector's allocation.
///
/// # Errors
///
/// Returns an error if the input contains characters that cannot be tokenized
/// or an unterminated string.
pub fn tokenize_into(input: &str, tokens: &mut Vec<Token>) -> Result<(), SyntaxError> {
    tokens.clear();
    let mut remaining = input;

    loop {
        let (rest, ()) = skip_trivia(remaining).map_err(|e| SyntaxError {
            message: format!("lexer error skipping whitespace: {e}"),
        })?;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let (rest, token) = single_token(remaining).map_err(|e| SyntaxError {
            message: format!(
                "unexpected input at: \"{}\" ({e})",
                remaining.chars().take(20).collect::<String>()
            ),
        })?;
        tokens.push(token);
        remaining = rest;
    }

    Ok(())
}

/// Tokenizes HCL source into a fresh vector of tokens.
///
/// # Errors
///
/// See [`tokenize_into`].
pub fn tokenize(input: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    tokenize_into(input, &mut tokens)?;
    Ok(tokens)
}
