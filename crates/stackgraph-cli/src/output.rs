//! Atlantis repo-config rendering of a resolution report.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stackgraph_common::constants::OUTPUT_VERSION;
use stackgraph_common::types::ProjectId;
use stackgraph_resolve::ProjectNode;

/// Serialization format of the generated document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// YAML, the format Atlantis reads from `atlantis.yaml`.
    #[default]
    Yaml,
    /// JSON.
    Json,
}

/// Top-level `atlantis.yaml` document.
#[derive(Debug, Serialize)]
pub struct AtlantisConfig {
    /// Schema version.
    pub version: u32,
    /// Merge the pull request once every plan is applied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub automerge: Option<bool>,
    /// Run plans of independent projects concurrently.
    pub parallel_plan: bool,
    /// Run applies of independent projects concurrently.
    pub parallel_apply: bool,
    /// Projects, sorted by directory.
    pub projects: Vec<ProjectEntry>,
    /// Workflows carried over from an existing document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows: Option<serde_yaml::Value>,
}

/// A project in the document: either generated by this run or carried
/// over verbatim from an existing document.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProjectEntry {
    /// Produced from a resolved project.
    Generated(AtlantisProject),
    /// Kept from the previous document.
    Preserved(serde_yaml::Value),
}

impl ProjectEntry {
    fn dir(&self) -> &str {
        match self {
            Self::Generated(project) => &project.dir,
            Self::Preserved(value) => value
                .get("dir")
                .and_then(serde_yaml::Value::as_str)
                .unwrap_or_default(),
        }
    }
}

/// The parts of a previously written document that survive regeneration.
#[derive(Debug, Default, Deserialize)]
pub struct ExistingConfig {
    #[serde(default)]
    workflows: Option<serde_yaml::Value>,
    #[serde(default)]
    projects: Vec<serde_yaml::Value>,
}

impl ExistingConfig {
    /// Reads the document at `path`; a missing or empty file yields an
    /// empty config.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not
    /// valid YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse existing document {}", path.display()))
    }
}

/// One Atlantis project entry.
#[derive(Debug, Serialize)]
pub struct AtlantisProject {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    workflow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    terraform_version: Option<String>,
    autoplan: Autoplan,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    apply_requirements: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_order_group: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    depends_on: Option<Vec<String>>,
}

impl AtlantisProject {
    fn new(project: &ProjectNode, options: DocumentOptions) -> Self {
        let label = |id: &ProjectId| {
            if options.project_names {
                id.name()
            } else {
                id.to_string()
            }
        };
        Self {
            name: options.project_names.then(|| project.id.name()),
            dir: project.id.to_string(),
            workspace: options.workspaces.then(|| project.id.name()),
            workflow: project.workflow.clone(),
            terraform_version: project.terraform_version.clone(),
            autoplan: Autoplan {
                enabled: project.autoplan,
                when_modified: project.trigger_paths(),
            },
            apply_requirements: project.apply_requirements.clone(),
            execution_order_group: project.execution_order_group,
            depends_on: project
                .depends_on
                .as_ref()
                .map(|ids| ids.iter().map(label).collect()),
        }
    }
}

#[derive(Debug, Serialize)]
struct Autoplan {
    enabled: bool,
    when_modified: Vec<String>,
}

/// Document-level settings that are not part of a project.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentOptions {
    /// Emit `name` for every project and refer to projects by name in `depends_on`.
    pub project_names: bool,
    /// Emit a per-project `workspace` named after the project.
    pub workspaces: bool,
    /// Value of `automerge`, omitted when unset.
    pub automerge: Option<bool>,
    /// Value of `parallel_plan` and `parallel_apply`.
    pub parallel: bool,
}

impl AtlantisConfig {
    /// Builds the document from ordered projects.
    #[must_use]
    pub fn from_projects(projects: &[ProjectNode], options: DocumentOptions) -> Self {
        let projects = projects
            .iter()
            .map(|project| ProjectEntry::Generated(AtlantisProject::new(project, options)))
            .collect();
        Self {
            version: OUTPUT_VERSION,
            automerge: options.automerge,
            parallel_plan: options.parallel,
            parallel_apply: options.parallel,
            projects,
            workflows: None,
        }
    }

    /// Carries over the workflows and, when asked, the projects of an
    /// existing document. A preserved project is dropped when this run
    /// generated one for the same directory.
    pub fn preserve(&mut self, existing: ExistingConfig, workflows: bool, projects: bool) {
        if workflows {
            self.workflows = existing.workflows;
        }
        if !projects {
            return;
        }
        let generated: BTreeSet<String> =
            self.projects.iter().map(|p| p.dir().to_string()).collect();
        self.projects.extend(
            existing
                .projects
                .into_iter()
                .map(ProjectEntry::Preserved)
                .filter(|entry| !generated.contains(entry.dir())),
        );
        self.projects.sort_by(|a, b| a.dir().cmp(b.dir()));
    }

    /// Serializes the document in `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn render(&self, format: Format) -> anyhow::Result<String> {
        match format {
            Format::Yaml => Ok(serde_yaml::to_string(self)?),
            Format::Json => {
                let mut text = serde_json::to_string_pretty(self)?;
                text.push('\n');
                Ok(text)
            }
        }
    }
}
