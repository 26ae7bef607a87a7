//! Run configuration: the behavior flags consumed by the resolution engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StackgraphError};

/// Root configuration for a resolution run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ResolveConfig {
    /// Root of the scanned tree. Project identifiers are relative to it.
    pub root: PathBuf,
    /// Fold the dependency sets of dependencies into each project.
    pub cascade_dependencies: bool,
    /// Ignore `dependency` and `dependencies` blocks.
    pub ignore_dependency_blocks: bool,
    /// Skip configuration files that only act as include parents.
    pub ignore_parent_terragrunt: bool,
    /// Resolve projects concurrently. `false` forces a single executor.
    pub parallel: bool,
    /// Width of the worker pool.
    pub num_executors: usize,
    /// Default autoplan setting for projects that do not declare one.
    pub autoplan: bool,
    /// Default workflow for projects that do not declare one.
    pub default_workflow: Option<String>,
    /// Default tool version for projects that do not declare one.
    pub default_terraform_version: Option<String>,
    /// Default apply requirements for projects that do not declare any.
    pub default_apply_requirements: Vec<String>,
    /// Emit a project name alongside the directory.
    pub create_project_name: bool,
    /// Extra file names whose directories become projects.
    pub project_hcl_files: Vec<String>,
    /// Emit children located under a project-hcl directory as projects too.
    pub create_hcl_project_childs: bool,
    /// Emit children outside a project-hcl directory as projects too.
    pub create_hcl_project_external_childs: bool,
    /// Only keep project-hcl directories explicitly marked with `atlantis_project`.
    pub use_project_markers: bool,
    /// Emit execution-order group indices.
    pub execution_order_groups: bool,
    /// Emit explicit `depends_on` predecessor lists.
    pub depends_on: bool,
    /// Path or glob filters applied to resolved projects.
    pub filter_paths: Vec<PathBuf>,
    /// Treat project-scoped errors as fatal to the whole run.
    pub fatal_project_errors: bool,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cascade_dependencies: true,
            ignore_dependency_blocks: false,
            ignore_parent_terragrunt: true,
            parallel: true,
            num_executors: default_executors(),
            autoplan: false,
            default_workflow: None,
            default_terraform_version: None,
            default_apply_requirements: Vec::new(),
            create_project_name: false,
            project_hcl_files: Vec::new(),
            create_hcl_project_childs: false,
            create_hcl_project_external_childs: true,
            use_project_markers: false,
            execution_order_groups: false,
            depends_on: false,
            filter_paths: Vec::new(),
            fatal_project_errors: false,
        }
    }
}

impl ResolveConfig {
    /// Number of workers the orchestrator should run.
    #[must_use]
    pub fn effective_executors(&self) -> usize {
        if self.parallel {
            self.num_executors.max(1)
        } else {
            1
        }
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`StackgraphError::Config`] for a zero-width pool or an empty root.
    pub fn validate(&self) -> Result<()> {
        if self.num_executors == 0 {
            return Err(StackgraphError::Config {
                message: "num_executors must be a positive integer".into(),
            });
        }
        if self.root.as_os_str().is_empty() {
            return Err(StackgraphError::Config {
                message: "root must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Default pool width: the machine's available parallelism.
#[must_use]
pub fn default_executors() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}
