//! # stackgraph-hcl
//!
//! Reads the subset of HCL that dependency resolution needs.
//!
//! - [`lexer`] tokenizes native syntax with `nom`.
//! - [`parser`] builds an [`ast::Body`] by recursive descent; [`json`]
//!   maps the JSON dialect onto the same tree.
//! - [`eval`] evaluates expressions to `serde_json::Value`.
//! - [`cache`] memoizes parse outcomes per file modification time and
//!   recycles parser instances through a pool.

pub mod ast;
pub mod cache;
pub mod eval;
pub mod json;
pub mod lexer;
pub mod parser;

pub use ast::{Attribute, Block, Body, Expression, TemplatePart};
pub use cache::{ParseCache, ParsedFile, ParserPool};
pub use parser::{Dialect, Parser};

/// A syntax problem found while tokenizing or parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SyntaxError {
    /// Human-readable description.
    pub message: String,
}
