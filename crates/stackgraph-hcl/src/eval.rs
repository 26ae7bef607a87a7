//! Expression evaluation to JSON values.
//!
//! Only what dependency resolution needs is evaluated: literals,
//! collections, templates, `local.*` references, and a handful of path
//! and environment functions. Anything else has no known value and
//! evaluates to `None` rather than failing.

use std::path::{Path, PathBuf};

use serde_json::{Map, Number, Value};
use stackgraph_common::constants::DEFAULT_PARENT_FILE;
use stackgraph_common::paths::normalize;

use crate::ast::{Body, Expression, TemplatePart};

/// Evaluation scope for a single configuration file.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// Directory of the configuration being resolved (the leaf of an
    /// include chain).
    pub terragrunt_dir: &'a Path,
    /// Directory of the file that declares the expression.
    pub file_dir: &'a Path,
    /// Locals visible to the expression.
    pub locals: &'a Map<String, Value>,
}

/// Evaluates `expr`, returning `None` for anything not statically known.
#[must_use]
pub fn evaluate(expr: &Expression, ctx: &EvalContext<'_>) -> Option<Value> {
    match expr {
        Expression::String(s) => Some(Value::String(s.clone())),
        Expression::Number(n) => Number::from_f64(*n).map(Value::Number),
        Expression::Bool(b) => Some(Value::Bool(*b)),
        Expression::Null => Some(Value::Null),
        Expression::List(items) => items
            .iter()
            .map(|item| evaluate(item, ctx))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        Expression::Object(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let _ = map.insert(key.clone(), evaluate(value, ctx)?);
            }
            Some(Value::Object(map))
        }
        Expression::Template(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    TemplatePart::Literal(text) => out.push_str(text),
                    TemplatePart::Interpolation(inner) => {
                        out.push_str(&render_scalar(&evaluate(inner, ctx)?)?);
                    }
                }
            }
            Some(Value::String(out))
        }
        Expression::Traversal(steps) => traverse(steps, ctx),
        Expression::Index { collection, key } => {
            let collection = evaluate(collection, ctx)?;
            let key = evaluate(key, ctx)?;
            index(&collection, &key)
        }
        Expression::Call { name, args } => call(name, args, ctx),
        Expression::Operation(_) => None,
    }
}

/// Evaluates a `locals` block, iterating until no further local resolves.
///
/// Locals may reference each other in any declaration order. A local
/// whose value never becomes known is left out of the result.
#[must_use]
pub fn evaluate_locals(block: &Body, terragrunt_dir: &Path, file_dir: &Path) -> Map<String, Value> {
    let mut resolved = Map::new();
    loop {
        let mut progressed = false;
        for attr in &block.attributes {
            if resolved.contains_key(&attr.name) {
                continue;
            }
            let ctx = EvalContext {
                terragrunt_dir,
                file_dir,
                locals: &resolved,
            };
            if let Some(value) = evaluate(&attr.expr, &ctx) {
                let _ = resolved.insert(attr.name.clone(), value);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    resolved
}

/// Names of the attributes of a `locals` block that `resolved` lacks,
/// in declaration order.
#[must_use]
pub fn unresolved_locals(block: &Body, resolved: &Map<String, Value>) -> Vec<String> {
    block
        .attributes
        .iter()
        .filter(|attr| !resolved.contains_key(&attr.name))
        .map(|attr| attr.name.clone())
        .collect()
}

fn render_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn traverse(steps: &[String], ctx: &EvalContext<'_>) -> Option<Value> {
    let (root, rest) = steps.split_first()?;
    if root != "local" {
        return None;
    }
    let (name, path) = rest.split_first()?;
    let mut current = ctx.locals.get(name)?.clone();
    for step in path {
        current = index(&current, &Value::String(step.clone()))?;
    }
    Some(current)
}

fn index(collection: &Value, key: &Value) -> Option<Value> {
    match (collection, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned(),
        (Value::Array(items), Value::Number(n)) => {
            let idx = n.as_f64()?;
            if idx < 0.0 || idx.fract() != 0.0 {
                return None;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            items.get(idx as usize).cloned()
        }
        (Value::Array(items), Value::String(s)) => items.get(s.parse::<usize>().ok()?).cloned(),
        _ => None,
    }
}

fn string_arg(args: &[Expression], idx: usize, ctx: &EvalContext<'_>) -> Option<String> {
    match evaluate(args.get(idx)?, ctx)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn call(name: &str, args: &[Expression], ctx: &EvalContext<'_>) -> Option<Value> {
    match name {
        "find_in_parent_folders" => {
            let target = if args.is_empty() {
                DEFAULT_PARENT_FILE.to_string()
            } else {
                string_arg(args, 0, ctx)?
            };
            match find_in_parent_folders(ctx.terragrunt_dir, &target) {
                Some(found) => Some(Value::String(found.to_string_lossy().into_owned())),
                None => args.get(1).and_then(|fallback| evaluate(fallback, ctx)),
            }
        }
        "get_terragrunt_dir" => Some(path_value(ctx.terragrunt_dir)),
        "get_parent_terragrunt_dir" => Some(path_value(ctx.file_dir)),
        "get_env" => {
            let var = string_arg(args, 0, ctx)?;
            match std::env::var(&var) {
                Ok(value) => Some(Value::String(value)),
                Err(_) => args.get(1).and_then(|default| evaluate(default, ctx)),
            }
        }
        _ => None,
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(normalize(path).to_string_lossy().into_owned())
}

/// Searches the ancestors of `start` (excluding `start` itself) for a file
/// named `name`, nearest first.
#[must_use]
pub fn find_in_parent_folders(start: &Path, name: &str) -> Option<PathBuf> {
    normalize(start)
        .ancestors()
        .skip(1)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
