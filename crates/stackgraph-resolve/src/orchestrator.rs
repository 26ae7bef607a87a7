//! Concurrent resolution of a whole tree.
//!
//! A fixed set of tokio workers pulls configuration files from a shared
//! queue and resolves each on the blocking pool. Every worker observes
//! the run's [`CancellationToken`]; so does the resolution itself at each
//! file it reads. Both caches are owned here and cleared at the start of
//! every run and whenever a run is aborted.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stackgraph_common::config::ResolveConfig;
use stackgraph_common::constants::DEFAULT_CONFIG_FILE;
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::paths::absolutize;
use stackgraph_common::types::FlagSignature;
use stackgraph_hcl::ParseCache;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::dependencies::{DependencyCache, DependencySet};
use crate::graph::{self, OrderingMode};
use crate::project::{self, ProjectFailure, ProjectNode};

type Outcome = (PathBuf, Result<Arc<DependencySet>>);

/// Outcome of a completed run.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Absolute root the project identifiers are relative to.
    pub root: PathBuf,
    /// Resolved projects, sorted by identifier.
    pub projects: Vec<ProjectNode>,
    /// Project-scoped failures, sorted by identifier.
    pub failures: Vec<ProjectFailure>,
}

/// Drives dependency resolution for a tree of configuration files.
#[derive(Debug)]
pub struct Resolver {
    config: Arc<ResolveConfig>,
    parse: Arc<ParseCache>,
    dependencies: Arc<DependencyCache>,
}

impl Resolver {
    /// Creates a resolver with empty caches.
    ///
    /// # Errors
    ///
    /// Returns [`StackgraphError::Config`] if the configuration is invalid.
    pub fn new(config: ResolveConfig) -> Result<Self> {
        config.validate()?;
        let parse = Arc::new(ParseCache::new());
        Ok(Self {
            config: Arc::new(config),
            dependencies: Arc::new(DependencyCache::new(Arc::clone(&parse))),
            parse,
        })
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &ResolveConfig {
        &self.config
    }

    /// The parse cache shared by every worker.
    #[must_use]
    pub fn parse_cache(&self) -> &ParseCache {
        &self.parse
    }

    /// The dependency cache shared by every worker.
    #[must_use]
    pub fn dependency_cache(&self) -> &DependencyCache {
        &self.dependencies
    }

    /// Clears both caches.
    pub fn reset(&self) {
        self.dependencies.clear();
        self.parse.clear();
    }

    /// Resolves every project among `candidates`.
    ///
    /// Project-scoped errors are reported in [`RunReport::failures`]
    /// unless `fatal_project_errors` is set, in which case the first one
    /// aborts the run and is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StackgraphError::Cancelled`] if `token` is cancelled,
    /// [`StackgraphError::Cycle`] if the requested ordering is impossible,
    /// or the first project error when project errors are fatal.
    pub async fn run(&self, candidates: Vec<PathBuf>, token: &CancellationToken) -> Result<RunReport> {
        self.reset();
        let cwd = std::env::current_dir().map_err(|e| StackgraphError::io(".", e))?;
        let root = absolutize(&cwd, &self.config.root);
        let candidates: Vec<PathBuf> = candidates
            .iter()
            .map(|path| absolutize(&root, path))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let modules: Vec<PathBuf> = candidates
            .iter()
            .filter(|p| p.file_name().is_some_and(|n| n == DEFAULT_CONFIG_FILE))
            .cloned()
            .collect();

        tracing::info!(
            root = %root.display(),
            modules = modules.len(),
            executors = self.config.effective_executors(),
            cascade = self.config.cascade_dependencies,
            "resolving dependencies"
        );

        let outcomes = self.resolve_all(modules, token).await?;
        let assembly = project::assemble(&self.config, &root, &self.parse, &candidates, outcomes);

        if token.is_cancelled() {
            self.reset();
            return Err(StackgraphError::Cancelled);
        }
        if self.config.fatal_project_errors {
            if let Some(failure) = assembly.failures.into_iter().next() {
                self.reset();
                return Err(failure.error);
            }
            return self.finish(&root, assembly.projects, Vec::new());
        }
        self.finish(&root, assembly.projects, assembly.failures)
    }

    fn finish(
        &self,
        root: &Path,
        projects: Vec<ProjectNode>,
        mut failures: Vec<ProjectFailure>,
    ) -> Result<RunReport> {
        let mut projects: Vec<ProjectNode> = projects
            .into_iter()
            .filter(|p| project::matches_filters(root, &p.dir, &self.config.filter_paths))
            .collect();
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        projects.dedup_by(|a, b| a.id == b.id);

        graph::assign_order(
            &mut projects,
            OrderingMode {
                groups: self.config.execution_order_groups,
                depends_on: self.config.depends_on,
            },
        )?;

        failures.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::info!(
            projects = projects.len(),
            failures = failures.len(),
            parses = self.parse.parse_count(),
            computations = self.dependencies.computations(),
            "resolution finished"
        );
        Ok(RunReport {
            root: root.to_path_buf(),
            projects,
            failures,
        })
    }

    /// Fans `files` out over the worker pool and gathers every outcome,
    /// sorted by path.
    async fn resolve_all(&self, files: Vec<PathBuf>, token: &CancellationToken) -> Result<Vec<Outcome>> {
        let run = token.child_token();
        let flags = FlagSignature {
            cascade: self.config.cascade_dependencies,
            ignore_dependency_blocks: self.config.ignore_dependency_blocks,
        };
        let width = self.config.effective_executors().min(files.len().max(1));

        let (job_tx, job_rx) = mpsc::channel::<PathBuf>(files.len().max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<Outcome>();

        let mut workers = JoinSet::new();
        for worker in 0..width {
            let jobs = Arc::clone(&job_rx);
            let results = result_tx.clone();
            let cache = Arc::clone(&self.dependencies);
            let run = run.clone();
            let _ = workers.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        () = run.cancelled() => None,
                        job = async { jobs.lock().await.recv().await } => job,
                    };
                    let Some(path) = next else {
                        break;
                    };
                    let cache = Arc::clone(&cache);
                    let job_token = run.clone();
                    let target = path.clone();
                    let outcome = tokio::task::spawn_blocking(move || {
                        cache.build_dependencies(&target, flags, &job_token)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(StackgraphError::Structural {
                            path: path.clone(),
                            message: format!("resolution task failed: {e}"),
                        })
                    });
                    if results.send((path, outcome)).is_err() {
                        break;
                    }
                }
                tracing::trace!(worker, "worker exiting");
            });
        }
        drop(result_tx);

        for file in files {
            if job_tx.send(file).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let mut outcomes = Vec::new();
        while let Some((path, outcome)) = result_rx.recv().await {
            if let Err(e) = &outcome {
                if self.config.fatal_project_errors && !e.is_cancelled() && !run.is_cancelled() {
                    tracing::warn!(config = %path.display(), error = %e, "project error is fatal, cancelling run");
                    run.cancel();
                }
            }
            outcomes.push((path, outcome));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::warn!(error = %e, "worker task failed");
            }
        }

        if token.is_cancelled() {
            tracing::info!("run cancelled, clearing caches");
            self.reset();
            return Err(StackgraphError::Cancelled);
        }

        if run.is_cancelled() {
            self.reset();
            // Report the error that caused the abort, not the cancellations it triggered.
            outcomes.retain(|(_, outcome)| !matches!(outcome, Err(e) if e.is_cancelled()));
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(outcomes)
    }
}
