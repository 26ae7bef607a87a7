//! `stackgraph generate`: resolve a terragrunt tree into an Atlantis project list.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgAction, Args};
use stackgraph_common::config::{ResolveConfig, default_executors};
use stackgraph_common::constants::DEFAULT_CONFIG_FILE;
use stackgraph_common::paths::absolutize;
use stackgraph_resolve::{Resolver, RunReport};
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::output::{AtlantisConfig, DocumentOptions, ExistingConfig, Format};

/// Arguments for the `generate` command.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct GenerateArgs {
    /// Root of the terragrunt tree.
    #[arg(long, env = "STACKGRAPH_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// File to write the document to. Defaults to stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Output format.
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    pub format: Format,

    /// Fold the dependencies of dependencies into each project.
    #[arg(long, env = "STACKGRAPH_CASCADE_DEPENDENCIES", default_value_t = true, action = ArgAction::Set)]
    pub cascade_dependencies: bool,

    /// Ignore `dependency` and `dependencies` blocks.
    #[arg(long, env = "STACKGRAPH_IGNORE_DEPENDENCY_BLOCKS")]
    pub ignore_dependency_blocks: bool,

    /// Skip configuration files that only act as include parents.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub ignore_parent_terragrunt: bool,

    /// Resolve projects concurrently and emit parallel plan/apply.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub parallel: bool,

    /// Width of the resolution worker pool.
    #[arg(long, env = "STACKGRAPH_NUM_EXECUTORS", value_parser = clap::value_parser!(u16).range(1..))]
    pub num_executors: Option<u16>,

    /// Enable autoplan for projects that do not set `atlantis_autoplan`.
    #[arg(long)]
    pub autoplan: bool,

    /// Default workflow for projects that do not set `atlantis_workflow`.
    #[arg(long, env = "STACKGRAPH_WORKFLOW")]
    pub workflow: Option<String>,

    /// Default tool version for projects that do not set one.
    #[arg(long, env = "STACKGRAPH_TERRAFORM_VERSION")]
    pub terraform_version: Option<String>,

    /// Default apply requirements, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub apply_requirements: Vec<String>,

    /// Emit a project name derived from the directory.
    #[arg(long)]
    pub create_project_name: bool,

    /// Emit a per-project workspace named after the project.
    #[arg(long)]
    pub create_workspace: bool,

    /// Keep the `workflows` of an existing output document.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub preserve_workflows: bool,

    /// Keep projects of an existing output document that this run does
    /// not regenerate.
    #[arg(long)]
    pub preserve_projects: bool,

    /// Additional file names whose directories become projects, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub project_hcl_files: Vec<String>,

    /// Also emit modules under a project-hcl directory as projects.
    #[arg(long)]
    pub create_hcl_project_childs: bool,

    /// Also emit modules outside a project-hcl directory that reference it as projects.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub create_hcl_project_external_childs: bool,

    /// Keep only project-hcl directories marked with `atlantis_project = true`.
    #[arg(long)]
    pub use_project_markers: bool,

    /// Emit `execution_order_group` for every project.
    #[arg(long)]
    pub execution_order_groups: bool,

    /// Emit `depends_on` for every project.
    #[arg(long)]
    pub depends_on: bool,

    /// Path or glob filters limiting the emitted projects, comma separated.
    #[arg(long, value_delimiter = ',')]
    pub filter: Vec<PathBuf>,

    /// Value of the document's `automerge` setting.
    #[arg(long)]
    pub automerge: Option<bool>,

    /// Fail the run on the first project error instead of skipping the project.
    #[arg(long)]
    pub strict: bool,
}

impl GenerateArgs {
    /// Maps the flags onto the engine configuration.
    #[must_use]
    pub fn to_config(&self) -> ResolveConfig {
        ResolveConfig {
            root: self.root.clone(),
            cascade_dependencies: self.cascade_dependencies,
            ignore_dependency_blocks: self.ignore_dependency_blocks,
            ignore_parent_terragrunt: self.ignore_parent_terragrunt,
            parallel: self.parallel,
            num_executors: self
                .num_executors
                .map_or_else(default_executors, usize::from),
            autoplan: self.autoplan,
            default_workflow: self.workflow.clone(),
            default_terraform_version: self.terraform_version.clone(),
            default_apply_requirements: self.apply_requirements.clone(),
            create_project_name: self.create_project_name,
            project_hcl_files: self.project_hcl_files.clone(),
            create_hcl_project_childs: self.create_hcl_project_childs,
            create_hcl_project_external_childs: self.create_hcl_project_external_childs,
            use_project_markers: self.use_project_markers,
            execution_order_groups: self.execution_order_groups,
            depends_on: self.depends_on,
            filter_paths: self.filter.clone(),
            fatal_project_errors: self.strict,
        }
    }

    /// Document settings; those shared with the engine come from `config`.
    const fn document_options(&self, config: &ResolveConfig) -> DocumentOptions {
        DocumentOptions {
            project_names: config.create_project_name,
            workspaces: self.create_workspace,
            automerge: self.automerge,
            parallel: config.parallel,
        }
    }
}

/// Executes the `generate` command.
///
/// Walks the root for configuration files, resolves every project's
/// dependencies, and writes the ordered project list. SIGINT or SIGTERM
/// cancels the run.
///
/// # Errors
///
/// Returns an error if an existing output cannot be read, the run is cancelled,
/// projects form a cycle, or the output cannot be written.
pub fn execute(args: GenerateArgs) -> anyhow::Result<()> {
    let token = shutdown_token()?;
    let document = generate(&args, &token)?;
    match &args.output {
        Some(path) => std::fs::write(path, &document)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => std::io::stdout().lock().write_all(document.as_bytes())?,
    }
    Ok(())
}

/// Returns a token cancelled on SIGINT or SIGTERM. Installable once per
/// process.
fn shutdown_token() -> anyhow::Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.cancel())
        .map_err(|e| anyhow::anyhow!("failed to set the shutdown handler: {e}"))?;
    Ok(token)
}

/// Runs a resolution for `args` and renders the resulting document,
/// merged with the existing output file when preservation is on.
///
/// # Errors
///
/// Returns an error on an invalid configuration, an unreadable existing
/// output, or a run-level resolution error.
pub fn generate(args: &GenerateArgs, token: &CancellationToken) -> anyhow::Result<String> {
    let mut config = args.to_config();
    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    config.root = absolutize(&cwd, &config.root);
    let options = args.document_options(&config);
    let candidates = discover(&config.root, &config.project_hcl_files);
    tracing::debug!(
        root = %config.root.display(),
        candidates = candidates.len(),
        "discovered configuration files"
    );

    let resolver = Resolver::new(config)?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let report: RunReport = runtime
        .block_on(resolver.run(candidates, token))
        .context("dependency resolution failed")?;

    for failure in &report.failures {
        tracing::warn!(
            project = %failure.id,
            file = %failure.config_file.display(),
            error = %failure.error,
            "project skipped"
        );
    }

    let mut document = AtlantisConfig::from_projects(&report.projects, options);
    let preserving = args.preserve_workflows || args.preserve_projects;
    if let Some(path) = args.output.as_deref().filter(|_| preserving) {
        let existing = ExistingConfig::load(path)?;
        document.preserve(existing, args.preserve_workflows, args.preserve_projects);
    }
    document.render(args.format)
}

/// Collects every `terragrunt.hcl` and project-hcl file under `root`,
/// skipping hidden directories such as `.terragrunt-cache`. Entries the
/// walker cannot read, symlink loops included, are logged and skipped.
fn discover(root: &Path, project_hcl_files: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(
                    path = %error.path().unwrap_or(root).display(),
                    error = %error,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name == DEFAULT_CONFIG_FILE || project_hcl_files.iter().any(|f| f == name) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    found
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;
    use crate::commands::{Cli, Command};

    fn parse(extra: &[&str]) -> GenerateArgs {
        let mut argv = vec!["stackgraph", "generate"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse").command {
            Command::Generate(args) => args,
        }
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn defaults_match_engine_defaults() {
        let config = parse(&[]).to_config();
        let defaults = ResolveConfig::default();
        assert_eq!(config.cascade_dependencies, defaults.cascade_dependencies);
        assert_eq!(config.ignore_parent_terragrunt, defaults.ignore_parent_terragrunt);
        assert_eq!(
            config.create_hcl_project_external_childs,
            defaults.create_hcl_project_external_childs
        );
        assert!(config.parallel);
        assert!(!config.fatal_project_errors);
        assert!(config.num_executors >= 1);
    }

    #[test]
    fn flags_map_onto_config() {
        let config = parse(&[
            "--root",
            "/infra",
            "--cascade-dependencies=false",
            "--num-executors",
            "3",
            "--workflow",
            "custom",
            "--apply-requirements",
            "approved,mergeable",
            "--project-hcl-files",
            "atlantis.hcl",
            "--filter",
            "prod/*",
            "--depends-on",
            "--strict",
        ])
        .to_config();
        assert_eq!(config.root, PathBuf::from("/infra"));
        assert!(!config.cascade_dependencies);
        assert_eq!(config.num_executors, 3);
        assert_eq!(config.default_workflow.as_deref(), Some("custom"));
        assert_eq!(config.default_apply_requirements, vec!["approved", "mergeable"]);
        assert_eq!(config.project_hcl_files, vec!["atlantis.hcl"]);
        assert_eq!(config.filter_paths, vec![PathBuf::from("prod/*")]);
        assert!(config.depends_on);
        assert!(config.fatal_project_errors);
    }

    #[test]
    fn document_options_follow_the_config() {
        let args = parse(&["--create-project-name", "--parallel=false", "--create-workspace"]);
        let mut config = args.to_config();
        let options = args.document_options(&config);
        assert!(options.project_names);
        assert!(options.workspaces);
        assert!(!options.parallel);

        config.create_project_name = false;
        config.parallel = true;
        let options = args.document_options(&config);
        assert!(!options.project_names);
        assert!(options.parallel);
    }

    #[test]
    fn preservation_defaults() {
        let args = parse(&[]);
        assert!(args.preserve_workflows);
        assert!(!args.preserve_projects);
        assert!(!args.create_workspace);
    }

    #[test]
    fn shutdown_handler_installs_once() {
        let token = shutdown_token().expect("install");
        assert!(!token.is_cancelled());
        assert!(shutdown_token().is_err());
    }

    #[test]
    fn zero_executors_rejected_by_parser() {
        let argv = ["stackgraph", "generate", "--num-executors", "0"];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn discover_skips_hidden_directories() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "prod/vpc/terragrunt.hcl", "");
        write(dir.path(), "prod/atlantis.hcl", "");
        write(dir.path(), "prod/vpc/.terragrunt-cache/x/terragrunt.hcl", "");
        write(dir.path(), "prod/vpc/main.tf", "");

        let found = discover(dir.path(), &["atlantis.hcl".to_string()]);
        assert_eq!(
            found,
            vec![
                dir.path().join("prod/atlantis.hcl"),
                dir.path().join("prod/vpc/terragrunt.hcl"),
            ]
        );
    }

    #[cfg(unix)]
    #[test]
    fn discover_survives_symlink_loops() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "prod/vpc/terragrunt.hcl", "");
        std::os::unix::fs::symlink(dir.path().join("prod"), dir.path().join("prod/vpc/loop"))
            .expect("symlink");

        let found = discover(dir.path(), &[]);
        assert_eq!(found, vec![dir.path().join("prod/vpc/terragrunt.hcl")]);
    }

    #[test]
    fn generate_keeps_existing_workflows_and_projects() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "vpc/terragrunt.hcl", "");
        let output = dir.path().join("atlantis.yaml");
        fs::write(
            &output,
            "workflows:\n  terragrunt:\n    plan:\n      steps:\n      - run: terragrunt plan -no-color -out $PLANFILE\nprojects:\n- dir: someDir\n  name: projectFromPreviousRun\n",
        )
        .expect("write");
        let root = dir.path().to_str().expect("utf-8 path");
        let out = output.to_str().expect("utf-8 path");

        let rendered = generate(
            &parse(&["--root", root, "--ignore-parent-terragrunt=false", "--output", out]),
            &CancellationToken::new(),
        )
        .expect("generate");
        assert!(rendered.contains("terragrunt plan -no-color -out $PLANFILE"));
        assert!(!rendered.contains("projectFromPreviousRun"));

        let rendered = generate(
            &parse(&[
                "--root",
                root,
                "--ignore-parent-terragrunt=false",
                "--output",
                out,
                "--preserve-projects",
            ]),
            &CancellationToken::new(),
        )
        .expect("generate");
        assert!(rendered.contains("projectFromPreviousRun"));
        assert!(rendered.contains("dir: vpc"));
    }

    #[test]
    fn generate_renders_ordered_projects() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "vpc/terragrunt.hcl", "");
        write(
            dir.path(),
            "app/terragrunt.hcl",
            "dependency \"vpc\" {\n  config_path = \"../vpc\"\n}\n",
        );
        let root = dir.path().to_str().expect("utf-8 path");
        let args = parse(&[
            "--root",
            root,
            "--ignore-parent-terragrunt=false",
            "--execution-order-groups",
            "--format",
            "json",
        ]);

        let rendered = generate(&args, &CancellationToken::new()).expect("generate");
        let doc: serde_json::Value = serde_json::from_str(&rendered).expect("json");
        let projects = doc["projects"].as_array().expect("projects");
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0]["dir"], "app");
        assert_eq!(projects[0]["execution_order_group"], 1);
        assert_eq!(projects[1]["dir"], "vpc");
        assert_eq!(projects[1]["execution_order_group"], 0);
        let triggers = projects[0]["autoplan"]["when_modified"]
            .as_array()
            .expect("triggers");
        assert!(triggers.iter().any(|t| t == "../vpc/terragrunt.hcl"));
    }

    #[test]
    fn cancelled_token_fails_the_run() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "vpc/terragrunt.hcl", "");
        let args = parse(&["--root", dir.path().to_str().expect("utf-8 path")]);
        let token = CancellationToken::new();
        token.cancel();

        let err = generate(&args, &token).expect_err("cancelled");
        assert!(format!("{err:#}").contains("cancelled"));
    }
}
