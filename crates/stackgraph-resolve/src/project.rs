//! Projects: discovery from resolved dependency sets, project-hcl
//! directories, filters, and trigger paths.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use stackgraph_common::config::ResolveConfig;
use stackgraph_common::constants::PROJECT_TRIGGER_GLOBS;
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::paths::{absolutize, is_external, relative_to, to_slash};
use stackgraph_common::types::ProjectId;
use stackgraph_hcl::ParseCache;

use crate::config_file::ConfigFile;
use crate::dependencies::DependencySet;
use crate::locals::{self, ResolvedLocals};

/// A resolved project, ready for ordering and output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectNode {
    /// Directory relative to the root.
    pub id: ProjectId,
    /// Absolute project directory.
    pub dir: PathBuf,
    /// Configuration file that defines the project.
    pub config_file: PathBuf,
    /// Workflow after defaults.
    pub workflow: Option<String>,
    /// Tool version after defaults.
    pub terraform_version: Option<String>,
    /// Autoplan enabled.
    pub autoplan: bool,
    /// Apply requirements after defaults.
    pub apply_requirements: Vec<String>,
    /// Sorted, de-duplicated absolute dependency paths.
    pub dependencies: Vec<PathBuf>,
    /// Config files of the modules folded into a project-hcl directory.
    /// They trigger re-plans of this project but never order it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<PathBuf>,
    /// Execution layer, when groups are requested.
    pub execution_order_group: Option<usize>,
    /// Predecessor projects, when explicit ordering is requested.
    pub depends_on: Option<Vec<ProjectId>>,
}

impl ProjectNode {
    /// Builds a node, falling back to configured defaults for anything
    /// the locals leave unset.
    #[must_use]
    pub fn new(
        config: &ResolveConfig,
        root: &Path,
        config_file: &Path,
        locals: &ResolvedLocals,
        dependencies: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        let dir = config_file.parent().unwrap_or(root).to_path_buf();
        let dependencies: BTreeSet<PathBuf> = dependencies.into_iter().collect();
        Self {
            id: ProjectId::from_dir(root, &dir),
            dir,
            config_file: config_file.to_path_buf(),
            workflow: locals
                .workflow
                .clone()
                .or_else(|| config.default_workflow.clone()),
            terraform_version: locals
                .terraform_version
                .clone()
                .or_else(|| config.default_terraform_version.clone()),
            autoplan: locals.autoplan.unwrap_or(config.autoplan),
            apply_requirements: locals
                .apply_requirements
                .clone()
                .unwrap_or_else(|| config.default_apply_requirements.clone()),
            dependencies: dependencies.into_iter().collect(),
            members: Vec::new(),
            execution_order_group: None,
            depends_on: None,
        }
    }

    fn from_set(config: &ResolveConfig, root: &Path, set: &DependencySet) -> Self {
        Self::new(
            config,
            root,
            &set.config_file,
            &set.locals,
            set.paths.iter().cloned(),
        )
    }

    /// Paths whose modification should re-plan the project: the standard
    /// globs, then every dependency relative to the project directory.
    #[must_use]
    pub fn trigger_paths(&self) -> Vec<String> {
        let relative: BTreeSet<String> = self
            .dependencies
            .iter()
            .map(|dep| to_slash(&relative_to(&self.dir, dep)))
            .filter(|p| !p.is_empty())
            .collect();
        let mut out: Vec<String> = PROJECT_TRIGGER_GLOBS.iter().map(ToString::to_string).collect();
        for path in relative {
            if !out.contains(&path) {
                out.push(path);
            }
        }
        out
    }
}

/// A project-scoped failure, reported alongside the successful projects.
#[derive(Debug, Clone)]
pub struct ProjectFailure {
    /// Project the failure belongs to.
    pub id: ProjectId,
    /// Configuration file being resolved.
    pub config_file: PathBuf,
    /// The error.
    pub error: StackgraphError,
}

/// A directory made into a project by one of the `project_hcl_files`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HclProject {
    /// Absolute project directory.
    pub dir: PathBuf,
    /// The project file inside it.
    pub file: PathBuf,
}

/// Picks the candidates named in `names`, one project per directory.
#[must_use]
pub fn hcl_projects(candidates: &[PathBuf], names: &[String]) -> Vec<HclProject> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for file in candidates {
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !names.iter().any(|n| n == name) {
            continue;
        }
        let Some(dir) = file.parent() else {
            continue;
        };
        if seen.insert(dir.to_path_buf()) {
            out.push(HclProject {
                dir: dir.to_path_buf(),
                file: file.clone(),
            });
        }
    }
    out.sort_by(|a, b| a.dir.cmp(&b.dir));
    out
}

/// Reads the locals declared directly in a project file.
///
/// # Errors
///
/// Returns the parse, structural, or locals error of the file.
pub fn file_locals(parse: &ParseCache, file: &Path) -> Result<ResolvedLocals> {
    let parsed = parse.parse(file);
    let dir = file.parent().unwrap_or(file);
    let config = ConfigFile::decode(file, parsed.body()?, dir)?;
    locals::resolve(&Value::Object(config.locals)).map_err(|failure| failure.error)
}

/// Children of a project-hcl directory.
#[derive(Debug, Default)]
pub struct HclChildren {
    /// Modules located under the project directory.
    pub internal: Vec<Arc<DependencySet>>,
    /// Modules elsewhere whose dependency set references the project file.
    pub external: Vec<Arc<DependencySet>>,
}

/// Splits resolved modules into the internal and external children of
/// `project`. Modules that are neither are left out.
#[must_use]
pub fn children_of(project: &HclProject, sets: &[Arc<DependencySet>]) -> HclChildren {
    let mut children = HclChildren::default();
    for set in sets {
        if set.config_file == project.file {
            continue;
        }
        if !is_external(&project.dir, set.dir()) {
            children.internal.push(Arc::clone(set));
        } else if set.paths.contains(&project.file) {
            children.external.push(Arc::clone(set));
        }
    }
    children
}

/// Returns `true` if `dir` passes the filters: it lies under one of them
/// or matches one as a glob. No filters keep everything.
#[must_use]
pub fn matches_filters(root: &Path, dir: &Path, filters: &[PathBuf]) -> bool {
    if filters.is_empty() {
        return true;
    }
    filters.iter().any(|filter| {
        let absolute = absolutize(root, filter);
        if dir.starts_with(&absolute) {
            return true;
        }
        glob::Pattern::new(&absolute.to_string_lossy())
            .is_ok_and(|pattern| pattern.matches_path(dir))
    })
}

/// Projects and failures produced from one run's dependency sets.
#[derive(Debug, Default)]
pub struct Assembly {
    /// Emitted projects, unordered.
    pub projects: Vec<ProjectNode>,
    /// Project-scoped failures.
    pub failures: Vec<ProjectFailure>,
}

impl Assembly {
    fn fail(&mut self, root: &Path, config_file: &Path, error: StackgraphError) {
        let dir = config_file.parent().unwrap_or(root);
        tracing::warn!(config = %config_file.display(), error = %error, "project failed to resolve");
        self.failures.push(ProjectFailure {
            id: ProjectId::from_dir(root, dir),
            config_file: config_file.to_path_buf(),
            error,
        });
    }

    fn push_module(&mut self, config: &ResolveConfig, root: &Path, set: &DependencySet) {
        if set.locals.skip == Some(true) {
            tracing::debug!(config = %set.config_file.display(), "skipping project marked atlantis_skip");
            return;
        }
        self.projects.push(ProjectNode::from_set(config, root, set));
    }
}

/// Turns resolution outcomes into projects.
///
/// Without `project_hcl_files`, every non-parent module is a project.
/// Otherwise each project-hcl directory is one, depending on the union of
/// its children's sets, and children are emitted only when asked for.
pub fn assemble(
    config: &ResolveConfig,
    root: &Path,
    parse: &ParseCache,
    candidates: &[PathBuf],
    outcomes: Vec<(PathBuf, Result<Arc<DependencySet>>)>,
) -> Assembly {
    let mut assembly = Assembly::default();
    let mut sets = Vec::new();
    for (file, outcome) in outcomes {
        match outcome {
            Ok(set) => sets.push(set),
            Err(error) => assembly.fail(root, &file, error),
        }
    }

    if config.project_hcl_files.is_empty() {
        for set in &sets {
            if set.is_parent && config.ignore_parent_terragrunt {
                tracing::debug!(config = %set.config_file.display(), "skipping parent configuration");
                continue;
            }
            assembly.push_module(config, root, set);
        }
        return assembly;
    }

    let mut emitted_children = BTreeSet::new();
    for project in hcl_projects(candidates, &config.project_hcl_files) {
        let locals = match file_locals(parse, &project.file) {
            Ok(locals) => locals,
            Err(error) => {
                assembly.fail(root, &project.file, error);
                continue;
            }
        };
        if config.use_project_markers && locals.marked_project != Some(true) {
            tracing::debug!(dir = %project.dir.display(), "skipping unmarked project directory");
            continue;
        }

        let children = children_of(&project, &sets);
        let mut dependencies = BTreeSet::from([project.file.clone()]);
        let mut members = BTreeSet::new();
        for child in children.internal.iter().chain(&children.external) {
            dependencies.extend(child.paths.iter().cloned());
            let _ = members.insert(child.config_file.clone());
        }
        if locals.skip != Some(true) {
            let mut node = ProjectNode::new(config, root, &project.file, &locals, dependencies);
            node.members = members.into_iter().collect();
            assembly.projects.push(node);
        }

        let mut emit = Vec::new();
        if config.create_hcl_project_childs {
            emit.extend(children.internal);
        }
        if config.create_hcl_project_external_childs {
            emit.extend(children.external);
        }
        for child in emit {
            if !(child.is_parent && config.ignore_parent_terragrunt)
                && emitted_children.insert(child.config_file.clone())
            {
                assembly.push_module(config, root, &child);
            }
        }
    }
    assembly
}
