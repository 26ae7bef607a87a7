//! Typed view of the recognized `locals` keys and their inheritance merge.

use serde::Serialize;
use serde_json::Value;
use stackgraph_common::constants::{
    LOCAL_APPLY_REQUIREMENTS, LOCAL_AUTOPLAN, LOCAL_EXTRA_DEPENDENCIES, LOCAL_PROJECT_MARKER,
    LOCAL_SKIP, LOCAL_TERRAFORM_VERSION, LOCAL_WORKFLOW,
};
use stackgraph_common::error::StackgraphError;

/// Recognized locals of one configuration file, or of a merged chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedLocals {
    /// `atlantis_workflow`.
    pub workflow: Option<String>,
    /// `atlantis_terraform_version`.
    pub terraform_version: Option<String>,
    /// `atlantis_autoplan`.
    pub autoplan: Option<bool>,
    /// `atlantis_skip`.
    pub skip: Option<bool>,
    /// `atlantis_apply_requirements`; `None` when not declared.
    pub apply_requirements: Option<Vec<String>>,
    /// `extra_atlantis_dependencies`, in declaration order.
    pub extra_dependencies: Vec<String>,
    /// `atlantis_project`.
    pub marked_project: Option<bool>,
}

/// A resolution failure together with everything read before it.
#[derive(Debug, Clone)]
pub struct PartialLocals {
    /// Fields populated before the failing key.
    pub partial: ResolvedLocals,
    /// The failure.
    pub error: StackgraphError,
}

/// Maps the recognized keys of an evaluated `locals` object onto
/// [`ResolvedLocals`]. Unrecognized keys are ignored.
///
/// Keys are read in a fixed order; on failure the fields read so far,
/// including list elements before the offending one, are returned with
/// the error.
///
/// # Errors
///
/// Returns [`StackgraphError::LocalsType`] for a key of the wrong type and
/// [`StackgraphError::LocalsValue`] for a non-string list element.
pub fn resolve(value: &Value) -> Result<ResolvedLocals, Box<PartialLocals>> {
    let mut out = ResolvedLocals::default();
    let map = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(out),
        _ => {
            return Err(Box::new(PartialLocals {
                partial: out,
                error: StackgraphError::LocalsType {
                    key: "locals".into(),
                    expected: "object",
                },
            }));
        }
    };

    macro_rules! step {
        ($e:expr) => {
            match $e {
                Ok(v) => v,
                Err(error) => return Err(Box::new(PartialLocals { partial: out, error })),
            }
        };
    }

    out.workflow = step!(string_key(map.get(LOCAL_WORKFLOW), LOCAL_WORKFLOW));
    out.terraform_version = step!(string_key(
        map.get(LOCAL_TERRAFORM_VERSION),
        LOCAL_TERRAFORM_VERSION
    ));
    out.autoplan = step!(bool_key(map.get(LOCAL_AUTOPLAN), LOCAL_AUTOPLAN));
    out.skip = step!(bool_key(map.get(LOCAL_SKIP), LOCAL_SKIP));
    out.marked_project = step!(bool_key(map.get(LOCAL_PROJECT_MARKER), LOCAL_PROJECT_MARKER));

    if let Some(list) = map.get(LOCAL_APPLY_REQUIREMENTS) {
        let mut items = Vec::new();
        let outcome = string_list(list, LOCAL_APPLY_REQUIREMENTS, &mut items);
        out.apply_requirements = Some(items);
        step!(outcome);
    }

    if let Some(list) = map.get(LOCAL_EXTRA_DEPENDENCIES) {
        let outcome = string_list(list, LOCAL_EXTRA_DEPENDENCIES, &mut out.extra_dependencies);
        step!(outcome);
    }

    Ok(out)
}

fn string_key(value: Option<&Value>, key: &str) -> Result<Option<String>, StackgraphError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(StackgraphError::LocalsType {
            key: key.into(),
            expected: "string",
        }),
    }
}

fn bool_key(value: Option<&Value>, key: &str) -> Result<Option<bool>, StackgraphError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(StackgraphError::LocalsType {
            key: key.into(),
            expected: "bool",
        }),
    }
}

fn string_list(value: &Value, key: &str, out: &mut Vec<String>) -> Result<(), StackgraphError> {
    let Value::Array(items) = value else {
        return Err(StackgraphError::LocalsType {
            key: key.into(),
            expected: "list of strings",
        });
    };
    for (idx, item) in items.iter().enumerate() {
        match item {
            Value::String(s) => out.push(s.clone()),
            _ => {
                return Err(StackgraphError::LocalsValue {
                    key: key.into(),
                    position: idx + 1,
                });
            }
        }
    }
    Ok(())
}

/// Merges a child's locals over its parent's.
///
/// Scalars come from the child when it sets them. Apply requirements
/// declared by the child replace the parent's. Extra dependencies are the
/// parent's followed by the child's, de-duplicated keeping the first
/// occurrence.
#[must_use]
pub fn merge(parent: &ResolvedLocals, child: &ResolvedLocals) -> ResolvedLocals {
    let mut extra_dependencies: Vec<String> = Vec::with_capacity(
        parent.extra_dependencies.len() + child.extra_dependencies.len(),
    );
    for dep in parent
        .extra_dependencies
        .iter()
        .chain(&child.extra_dependencies)
    {
        if !extra_dependencies.contains(dep) {
            extra_dependencies.push(dep.clone());
        }
    }

    ResolvedLocals {
        workflow: child.workflow.clone().or_else(|| parent.workflow.clone()),
        terraform_version: child
            .terraform_version
            .clone()
            .or_else(|| parent.terraform_version.clone()),
        autoplan: child.autoplan.or(parent.autoplan),
        skip: child.skip.or(parent.skip),
        apply_requirements: child
            .apply_requirements
            .clone()
            .or_else(|| parent.apply_requirements.clone()),
        extra_dependencies,
        marked_project: child.marked_project.or(parent.marked_project),
    }
}

/// Folds [`merge`] over a chain ordered root first, leaf last.
pub fn merge_chain<'a>(chain: impl IntoIterator<Item = &'a ResolvedLocals>) -> ResolvedLocals {
    chain
        .into_iter()
        .fold(ResolvedLocals::default(), |acc, next| merge(&acc, next))
}
