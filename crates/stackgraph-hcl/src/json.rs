//! JSON dialect of HCL.
//!
//! A JSON object maps to a body. Keys naming a known block type become
//! blocks, with as many nested object levels consumed as labels as the
//! block type declares. Every other key is an attribute. Strings are
//! templates, so `"${local.x}"` interpolates just like native syntax.

use serde_json::{Map, Value};

use crate::SyntaxError;
use crate::ast::{Attribute, Block, Body, Expression};
use crate::lexer;
use crate::parser::string_expression;

/// Block types recognized in JSON files, with their label counts.
const BLOCK_LABELS: &[(&str, usize)] = &[
    ("include", 0),
    ("locals", 0),
    ("terraform", 0),
    ("dependencies", 0),
    ("remote_state", 0),
    ("dependency", 1),
    ("module", 1),
    ("extra_arguments", 1),
    ("before_hook", 1),
    ("after_hook", 1),
    ("generate", 1),
    ("provider", 1),
    ("variable", 1),
    ("output", 1),
    ("resource", 2),
    ("data", 2),
];

/// Parses a JSON-dialect configuration file.
///
/// # Errors
///
/// Returns a [`SyntaxError`] if the text is not JSON, the top level is not
/// an object, or a block has the wrong shape.
pub fn parse_json(source: &str) -> Result<Body, SyntaxError> {
    let value: Value = serde_json::from_str(source).map_err(|e| SyntaxError {
        message: format!("invalid JSON: {e}"),
    })?;
    match value {
        Value::Object(map) => convert_body(&map),
        other => Err(SyntaxError {
            message: format!("top level of a JSON configuration must be an object, got {other}"),
        }),
    }
}

fn label_count(kind: &str, value: &Value) -> Option<usize> {
    // A labeled include wraps its body one level deeper than an unlabeled one.
    if kind == "include" {
        let first = value.as_array().and_then(|a| a.first()).unwrap_or(value);
        let unlabeled = first
            .as_object()
            .is_some_and(|o| o.contains_key("path") || o.is_empty());
        return Some(usize::from(!unlabeled));
    }
    BLOCK_LABELS
        .iter()
        .find(|(name, _)| *name == kind)
        .map(|(_, n)| *n)
}

fn convert_body(map: &Map<String, Value>) -> Result<Body, SyntaxError> {
    let mut body = Body::default();
    for (key, value) in map {
        match label_count(key, value) {
            Some(labels) => push_blocks(&mut body.blocks, key, value, labels, Vec::new())?,
            None => body.attributes.push(Attribute {
                name: key.clone(),
                expr: convert_value(value)?,
            }),
        }
    }
    Ok(body)
}

fn push_blocks(
    out: &mut Vec<Block>,
    kind: &str,
    value: &Value,
    remaining: usize,
    labels: Vec<String>,
) -> Result<(), SyntaxError> {
    match value {
        Value::Array(items) => {
            for item in items {
                push_blocks(out, kind, item, remaining, labels.clone())?;
            }
            Ok(())
        }
        Value::Object(map) if remaining == 0 => {
            out.push(Block {
                kind: kind.to_string(),
                labels,
                body: convert_body(map)?,
            });
            Ok(())
        }
        Value::Object(map) => {
            for (label, inner) in map {
                let mut next = labels.clone();
                next.push(label.clone());
                push_blocks(out, kind, inner, remaining - 1, next)?;
            }
            Ok(())
        }
        other => Err(SyntaxError {
            message: format!("block {kind} must be an object, got {other}"),
        }),
    }
}

fn convert_value(value: &Value) -> Result<Expression, SyntaxError> {
    Ok(match value {
        Value::Null => Expression::Null,
        Value::Bool(b) => Expression::Bool(*b),
        Value::Number(n) => Expression::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => string_expression(&lexer::template_parts(s)?)?,
        Value::Array(items) => {
            Expression::List(items.iter().map(convert_value).collect::<Result<_, _>>()?)
        }
        Value::Object(map) => Expression::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), convert_value(v)?)))
                .collect::<Result<_, SyntaxError>>()?,
        ),
    })
}
