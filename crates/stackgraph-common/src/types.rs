//! Domain primitive types used across the stackgraph workspace.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::paths;

/// Identifier of a project: its directory relative to the scanned root,
/// always `/`-separated, `.` for the root itself.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Creates a project ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the ID of `dir` relative to `root`.
    #[must_use]
    pub fn from_dir(root: &Path, dir: &Path) -> Self {
        let relative = paths::relative_to(root, dir);
        let text = paths::to_slash(&relative);
        if text.is_empty() {
            Self(".".into())
        } else {
            Self(text)
        }
    }

    /// Project name form: the ID with separators replaced by underscores.
    #[must_use]
    pub fn name(&self) -> String {
        self.0.replace('/', "_")
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behavior flags that change the outcome of dependency resolution and
/// therefore take part in the dependency cache key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FlagSignature {
    /// Transitive resolution enabled.
    pub cascade: bool,
    /// Dependency blocks ignored.
    pub ignore_dependency_blocks: bool,
}
