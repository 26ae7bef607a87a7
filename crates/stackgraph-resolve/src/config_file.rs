//! Decoding of the dependency-relevant sections of a configuration file.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use stackgraph_common::constants::{DEFAULT_CONFIG_FILE, RECOGNIZED_LOCALS};
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::paths::absolutize;
use stackgraph_hcl::eval::{self, EvalContext};
use stackgraph_hcl::{Block, Body, Expression};

use crate::modules::is_local;

/// An `include` block after evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeReference {
    /// Block label; empty for the unlabeled form.
    pub label: String,
    /// Absolute path of the included file.
    pub path: PathBuf,
}

/// The parts of one configuration file that affect its dependency set.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Include targets in declaration order.
    pub includes: Vec<IncludeReference>,
    /// `dependency` block and `dependencies.paths` targets, as config files.
    pub dependency_paths: Vec<PathBuf>,
    /// Evaluated `terraform.source`.
    pub terraform_source: Option<String>,
    /// Required and optional var files from `extra_arguments` blocks.
    pub var_files: Vec<PathBuf>,
    /// Evaluated `locals` block.
    pub locals: Map<String, Value>,
}

impl ConfigFile {
    /// Decodes `body`, the contents of `path`.
    ///
    /// `terragrunt_dir` is the directory of the configuration being
    /// resolved; it differs from the file's own directory when `path` is
    /// an include target. Include paths resolve against the file's
    /// directory, every other path against `terragrunt_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StackgraphError::Structural`] for more than one unlabeled
    /// include, and [`StackgraphError::LocalsUnresolved`] when a recognized
    /// local cannot be evaluated.
    pub fn decode(path: &Path, body: &Body, terragrunt_dir: &Path) -> Result<Self> {
        let file_dir = path.parent().unwrap_or(terragrunt_dir);
        let locals = match body.first_block("locals") {
            Some(block) => decode_locals(path, &block.body, terragrunt_dir, file_dir)?,
            None => Map::new(),
        };
        let ctx = EvalContext {
            terragrunt_dir,
            file_dir,
            locals: &locals,
        };

        let includes = decode_includes(path, body, &ctx)?;
        let dependency_paths = decode_dependencies(path, body, &ctx);
        let terraform = body.first_block("terraform");
        let terraform_source = terraform
            .and_then(|t| t.body.attribute("source"))
            .and_then(|a| string_value(&a.expr, &ctx));
        let var_files = terraform
            .map(|t| decode_var_files(t, &ctx))
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            includes,
            dependency_paths,
            terraform_source,
            var_files,
            locals,
        })
    }

    /// A parent configuration only exists to be included: it includes
    /// nothing and declares no `terraform.source`.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.includes.is_empty() && self.terraform_source.is_none()
    }

    /// On-disk directory of a local `terraform.source`, relative to
    /// `terragrunt_dir` unless already absolute. `//` sub-directory
    /// markers and `?ref=` queries are stripped.
    #[must_use]
    pub fn local_source_dir(&self, terragrunt_dir: &Path) -> Option<PathBuf> {
        let source = self.terraform_source.as_deref()?;
        if !is_local(source) && !Path::new(source).is_absolute() {
            return None;
        }
        let without_query = source.split_once('?').map_or(source, |(path, _)| path);
        let cleaned = without_query.replace('\\', "/").replace("//", "/");
        Some(absolutize(terragrunt_dir, Path::new(&cleaned)))
    }
}

/// Evaluates a `locals` block. Unknown values are tolerated everywhere
/// except in the keys this tool reads.
fn decode_locals(
    path: &Path,
    block: &Body,
    terragrunt_dir: &Path,
    file_dir: &Path,
) -> Result<Map<String, Value>> {
    let locals = eval::evaluate_locals(block, terragrunt_dir, file_dir);
    for key in eval::unresolved_locals(block, &locals) {
        if RECOGNIZED_LOCALS.contains(&key.as_str()) {
            return Err(StackgraphError::LocalsUnresolved {
                path: path.to_path_buf(),
                key,
            });
        }
        tracing::debug!(file = %path.display(), local = %key, "local has no static value");
    }
    Ok(locals)
}

fn string_value(expr: &Expression, ctx: &EvalContext<'_>) -> Option<String> {
    match eval::evaluate(expr, ctx)? {
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn string_list(expr: &Expression, ctx: &EvalContext<'_>) -> Vec<String> {
    match eval::evaluate(expr, ctx) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn decode_includes(
    path: &Path,
    body: &Body,
    ctx: &EvalContext<'_>,
) -> Result<Vec<IncludeReference>> {
    let mut includes = Vec::new();
    let mut unlabeled = 0usize;
    for block in body.blocks_of("include") {
        let label = block.labels.first().cloned().unwrap_or_default();
        if label.is_empty() {
            unlabeled += 1;
            if unlabeled > 1 {
                return Err(StackgraphError::Structural {
                    path: path.to_path_buf(),
                    message: "only one unlabeled include block is allowed".into(),
                });
            }
        }
        let Some(target) = block
            .body
            .attribute("path")
            .and_then(|a| string_value(&a.expr, ctx))
        else {
            tracing::warn!(
                file = %path.display(),
                label = %label,
                "include path could not be evaluated, ignoring"
            );
            continue;
        };
        includes.push(IncludeReference {
            label,
            path: absolutize(ctx.file_dir, Path::new(&target)),
        });
    }
    Ok(includes)
}

/// Turns a dependency target into the path of its configuration file.
fn config_file_of(dir: &Path, target: &str) -> PathBuf {
    let absolute = absolutize(dir, Path::new(target));
    if absolute.extension().is_some_and(|ext| ext == "hcl" || ext == "json") {
        absolute
    } else {
        absolute.join(DEFAULT_CONFIG_FILE)
    }
}

fn decode_dependencies(path: &Path, body: &Body, ctx: &EvalContext<'_>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for block in body.blocks_of("dependency") {
        match block
            .body
            .attribute("config_path")
            .and_then(|a| string_value(&a.expr, ctx))
        {
            Some(target) => out.push(config_file_of(ctx.terragrunt_dir, &target)),
            None => tracing::warn!(
                file = %path.display(),
                dependency = %block.labels.first().map_or("", String::as_str),
                "dependency config_path could not be evaluated, ignoring"
            ),
        }
    }
    for block in body.blocks_of("dependencies") {
        if let Some(attr) = block.body.attribute("paths") {
            out.extend(
                string_list(&attr.expr, ctx)
                    .iter()
                    .map(|target| config_file_of(ctx.terragrunt_dir, target)),
            );
        }
    }
    out
}

fn decode_var_files(terraform: &Block, ctx: &EvalContext<'_>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for block in terraform.body.blocks_of("extra_arguments") {
        for key in ["required_var_files", "optional_var_files"] {
            if let Some(attr) = block.body.attribute(key) {
                out.extend(
                    string_list(&attr.expr, ctx)
                        .iter()
                        .map(|file| absolutize(ctx.terragrunt_dir, Path::new(file))),
                );
            }
        }
    }
    out
}
