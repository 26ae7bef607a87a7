//! Per-project dependency sets and the cache that coalesces their
//! computation.
//!
//! A *direct* dependency set is computed from the project file and its
//! include chain alone and never waits on another project's result. A
//! *cascade* set is the fixed point of direct sets reachable through
//! project configuration files. Both are cached under
//! `(config file, FlagSignature)` and invalidated when any file read
//! during the computation changes.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use stackgraph_common::coalesce::CoalescingMap;
use stackgraph_common::constants::{DEFAULT_CONFIG_FILE, MODULE_TRIGGER_GLOBS};
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::paths::{FileStamp, absolutize, normalize};
use stackgraph_common::types::FlagSignature;
use stackgraph_hcl::ParseCache;
use tokio_util::sync::CancellationToken;

use crate::config_file::ConfigFile;
use crate::locals::{self, ResolvedLocals};
use crate::modules::ModuleWalk;

/// Resolved dependencies of one configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySet {
    /// Absolute path of the configuration file.
    pub config_file: PathBuf,
    /// Locals merged along the include chain, root first.
    pub locals: ResolvedLocals,
    /// The file only exists to be included.
    pub is_parent: bool,
    /// Files reached through the include chain.
    pub includes: Vec<PathBuf>,
    /// Sorted, de-duplicated absolute dependency paths and globs.
    pub paths: Vec<PathBuf>,
}

impl DependencySet {
    /// Directory of the configuration file.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.config_file.parent().unwrap_or(&self.config_file)
    }
}

/// A cached computation: its outcome plus the inputs it observed.
#[derive(Debug)]
pub struct DependencyEntry {
    inputs: Vec<FileStamp>,
    /// The dependency set, or the project-scoped error.
    pub outcome: Result<Arc<DependencySet>>,
}

impl DependencyEntry {
    fn is_current(&self) -> bool {
        self.inputs.iter().all(FileStamp::is_current)
    }

    fn failed(inputs: Vec<FileStamp>, error: StackgraphError) -> Self {
        Self {
            inputs,
            outcome: Err(error),
        }
    }
}

type CacheKey = (PathBuf, FlagSignature);

/// Coalescing cache of dependency sets.
#[derive(Debug)]
pub struct DependencyCache {
    parse: Arc<ParseCache>,
    entries: CoalescingMap<CacheKey, DependencyEntry>,
}

impl DependencyCache {
    /// Creates an empty cache reading files through `parse`.
    #[must_use]
    pub fn new(parse: Arc<ParseCache>) -> Self {
        Self {
            parse,
            entries: CoalescingMap::new(),
        }
    }

    /// Computes (or reuses) the dependency set of `config_file`.
    ///
    /// Concurrent calls with the same file and flags share one
    /// computation and receive the same `Arc`.
    ///
    /// # Errors
    ///
    /// Returns the project-scoped error of the computation, or
    /// [`StackgraphError::Cancelled`] once `token` is cancelled.
    pub fn build_dependencies(
        &self,
        config_file: &Path,
        flags: FlagSignature,
        token: &CancellationToken,
    ) -> Result<Arc<DependencySet>> {
        let path = normalize(config_file);
        let entry = if flags.cascade {
            self.cascade_entry(&path, flags.ignore_dependency_blocks, token)
        } else {
            self.direct_entry(&path, flags.ignore_dependency_blocks, token)
        };
        entry.outcome.clone()
    }

    /// Number of computations actually run.
    #[must_use]
    pub fn computations(&self) -> usize {
        self.entries.computations()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    fn cached<F>(&self, key: CacheKey, compute: F) -> Arc<DependencyEntry>
    where
        F: FnOnce() -> DependencyEntry,
    {
        let entry = self
            .entries
            .get_or_compute(&key, DependencyEntry::is_current, compute);
        if matches!(&entry.outcome, Err(e) if e.is_cancelled()) {
            self.entries.discard(&key, &entry);
        }
        entry
    }

    fn direct_entry(
        &self,
        path: &Path,
        ignore_dependency_blocks: bool,
        token: &CancellationToken,
    ) -> Arc<DependencyEntry> {
        let key = (
            path.to_path_buf(),
            FlagSignature {
                cascade: false,
                ignore_dependency_blocks,
            },
        );
        self.cached(key, || {
            let mut inputs = Vec::new();
            match self.compute_direct(path, ignore_dependency_blocks, token, &mut inputs) {
                Ok(set) => DependencyEntry {
                    inputs,
                    outcome: Ok(Arc::new(set)),
                },
                Err(error) => DependencyEntry::failed(inputs, error),
            }
        })
    }

    fn cascade_entry(
        &self,
        path: &Path,
        ignore_dependency_blocks: bool,
        token: &CancellationToken,
    ) -> Arc<DependencyEntry> {
        let key = (
            path.to_path_buf(),
            FlagSignature {
                cascade: true,
                ignore_dependency_blocks,
            },
        );
        self.cached(key, || {
            let mut inputs = Vec::new();
            match self.compute_cascade(path, ignore_dependency_blocks, token, &mut inputs) {
                Ok(set) => DependencyEntry {
                    inputs,
                    outcome: Ok(Arc::new(set)),
                },
                Err(error) => DependencyEntry::failed(inputs, error),
            }
        })
    }

    fn parse_config(
        &self,
        path: &Path,
        terragrunt_dir: &Path,
        inputs: &mut Vec<FileStamp>,
    ) -> Result<ConfigFile> {
        let parsed = self.parse.parse(path);
        inputs.push(FileStamp {
            path: parsed.path.clone(),
            modified: parsed.modified,
        });
        ConfigFile::decode(path, parsed.body()?, terragrunt_dir)
    }

    /// Appends the include ancestors of `config` to `chain`, root first.
    #[allow(clippy::too_many_arguments)]
    fn collect_includes(
        &self,
        project: &Path,
        config: &ConfigFile,
        terragrunt_dir: &Path,
        visited: &mut HashSet<PathBuf>,
        chain: &mut Vec<ConfigFile>,
        inputs: &mut Vec<FileStamp>,
        token: &CancellationToken,
    ) -> Result<()> {
        for include in &config.includes {
            if !visited.insert(include.path.clone()) {
                continue;
            }
            if token.is_cancelled() {
                return Err(StackgraphError::Cancelled);
            }
            let parent = self
                .parse_config(&include.path, terragrunt_dir, inputs)
                .map_err(|e| StackgraphError::DependencyResolution {
                    project: project.to_path_buf(),
                    target: include.path.clone(),
                    source: Box::new(e),
                })?;
            self.collect_includes(project, &parent, terragrunt_dir, visited, chain, inputs, token)?;
            chain.push(parent);
        }
        Ok(())
    }

    fn compute_direct(
        &self,
        path: &Path,
        ignore_dependency_blocks: bool,
        token: &CancellationToken,
        inputs: &mut Vec<FileStamp>,
    ) -> Result<DependencySet> {
        if token.is_cancelled() {
            return Err(StackgraphError::Cancelled);
        }
        tracing::debug!(config = %path.display(), "computing direct dependencies");
        let dir = path.parent().unwrap_or(path).to_path_buf();
        let leaf = self.parse_config(path, &dir, inputs)?;

        let mut visited = HashSet::from([path.to_path_buf()]);
        let mut chain = Vec::new();
        self.collect_includes(path, &leaf, &dir, &mut visited, &mut chain, inputs, token)?;
        let is_parent = leaf.is_parent();
        chain.push(leaf);

        let resolved: Vec<ResolvedLocals> = chain
            .iter()
            .map(|config| {
                locals::resolve(&Value::Object(config.locals.clone())).map_err(|failure| {
                    tracing::debug!(
                        file = %config.path.display(),
                        partial = ?failure.partial,
                        "locals resolved partially"
                    );
                    failure.error
                })
            })
            .collect::<Result<_>>()?;
        let merged = locals::merge_chain(&resolved);

        let mut paths = BTreeSet::from([path.to_path_buf()]);
        let includes: Vec<PathBuf> = chain[..chain.len() - 1]
            .iter()
            .map(|c| c.path.clone())
            .collect();
        paths.extend(includes.iter().cloned());

        if !ignore_dependency_blocks {
            for config in &chain {
                paths.extend(config.dependency_paths.iter().cloned());
            }
        }

        let mut walk = ModuleWalk::default();
        let source_dir = chain
            .iter()
            .rev()
            .find(|c| c.terraform_source.is_some())
            .and_then(|c| c.local_source_dir(&dir));
        if let Some(source_dir) = source_dir {
            for pattern in MODULE_TRIGGER_GLOBS {
                let _ = paths.insert(source_dir.join(pattern));
            }
            walk.visit(&self.parse, &source_dir);
        }
        walk.visit(&self.parse, &dir);
        paths.extend(walk.globs);
        inputs.append(&mut walk.inputs);

        for config in &chain {
            paths.extend(config.var_files.iter().cloned());
        }

        for extra in &merged.extra_dependencies {
            let absolute = absolutize(&dir, Path::new(extra));
            if absolute.is_dir() {
                let _ = paths.insert(absolute.join("**").join("*"));
            } else {
                let _ = paths.insert(absolute);
            }
        }

        Ok(DependencySet {
            config_file: path.to_path_buf(),
            locals: merged,
            is_parent,
            includes,
            paths: paths.into_iter().collect(),
        })
    }

    fn compute_cascade(
        &self,
        path: &Path,
        ignore_dependency_blocks: bool,
        token: &CancellationToken,
        inputs: &mut Vec<FileStamp>,
    ) -> Result<DependencySet> {
        let root = self.direct_entry(path, ignore_dependency_blocks, token);
        inputs.extend(root.inputs.iter().cloned());
        let root = Arc::clone(root.outcome.as_ref().map_err(Clone::clone)?);

        let mut visited: HashSet<PathBuf> = HashSet::from([path.to_path_buf()]);
        visited.extend(root.includes.iter().cloned());
        let mut all: BTreeSet<PathBuf> = root.paths.iter().cloned().collect();
        let mut queue: VecDeque<PathBuf> = root
            .paths
            .iter()
            .filter(|p| is_project_config(p))
            .cloned()
            .collect();

        while let Some(dep) = queue.pop_front() {
            if !visited.insert(dep.clone()) {
                continue;
            }
            if token.is_cancelled() {
                return Err(StackgraphError::Cancelled);
            }
            let entry = self.direct_entry(&dep, ignore_dependency_blocks, token);
            inputs.extend(entry.inputs.iter().cloned());
            let set = match &entry.outcome {
                Ok(set) => set,
                Err(e) if e.is_cancelled() => return Err(StackgraphError::Cancelled),
                Err(e) => {
                    return Err(StackgraphError::DependencyResolution {
                        project: path.to_path_buf(),
                        target: dep,
                        source: Box::new(e.clone()),
                    });
                }
            };
            visited.extend(set.includes.iter().cloned());
            for p in &set.paths {
                if all.insert(p.clone()) && is_project_config(p) {
                    queue.push_back(p.clone());
                }
            }
        }

        Ok(DependencySet {
            paths: all.into_iter().collect(),
            ..(*root).clone()
        })
    }
}

fn is_project_config(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == DEFAULT_CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const DIRECT: FlagSignature = FlagSignature {
        cascade: false,
        ignore_dependency_blocks: false,
    };
    const CASCADE: FlagSignature = FlagSignature {
        cascade: true,
        ignore_dependency_blocks: false,
    };

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    fn cache() -> DependencyCache {
        DependencyCache::new(Arc::new(ParseCache::new()))
    }

    #[test]
    fn direct_set_covers_every_source() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(&root.join("root.hcl"), "locals {\n  atlantis_workflow = \"w\"\n}\n");
        write(
            &root.join("app/terragrunt.hcl"),
            r#"
include "root" {
  path = find_in_parent_folders("root.hcl")
}
terraform {
  source = "../modules/app"
}
dependency "vpc" {
  config_path = "../vpc"
}
locals {
  extra_atlantis_dependencies = ["../shared", "../config.yaml"]
}
"#,
        );
        write(&root.join("modules/app/main.tf"), "module \"n\" {\n  source = \"../nested\"\n}\n");
        write(&root.join("modules/nested/main.tf"), "");
        fs::create_dir_all(root.join("shared")).expect("mkdir");

        let set = cache()
            .build_dependencies(&root.join("app/terragrunt.hcl"), DIRECT, &CancellationToken::new())
            .expect("resolve");

        let expected: Vec<PathBuf> = [
            root.join("app/terragrunt.hcl"),
            root.join("config.yaml"),
            root.join("modules/app/*.tf*"),
            root.join("modules/app/*.tofu*"),
            root.join("modules/nested/*.tf*"),
            root.join("modules/nested/*.tofu*"),
            root.join("root.hcl"),
            root.join("shared/**/*"),
            root.join("vpc/terragrunt.hcl"),
        ]
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
        assert_eq!(set.paths, expected);
        assert_eq!(set.locals.workflow.as_deref(), Some("w"));
        assert!(!set.is_parent);
    }

    #[test]
    fn absolute_terraform_source_is_walked() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(
            &root.join("app/terragrunt.hcl"),
            "terraform {\n  source = \"${get_terragrunt_dir()}/../modules/app\"\n}\n",
        );
        write(&root.join("modules/app/main.tf"), "");

        let set = cache()
            .build_dependencies(&root.join("app/terragrunt.hcl"), DIRECT, &CancellationToken::new())
            .expect("resolve");
        assert!(set.paths.contains(&root.join("modules/app/*.tf*")));
        assert!(set.paths.contains(&root.join("modules/app/*.tofu*")));
    }

    #[test]
    fn unevaluable_extra_dependency_fails_the_project() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(
            &root.join("app/terragrunt.hcl"),
            r#"
locals {
  extra_atlantis_dependencies = ["../shared", "${get_aws_account_id()}.yaml"]
}
"#,
        );
        fs::create_dir_all(root.join("shared")).expect("mkdir");

        let result = cache().build_dependencies(
            &root.join("app/terragrunt.hcl"),
            DIRECT,
            &CancellationToken::new(),
        );
        let Err(StackgraphError::LocalsUnresolved { key, .. }) = result else {
            panic!("expected unresolved locals error, got {result:?}");
        };
        assert_eq!(key, "extra_atlantis_dependencies");
    }

    #[test]
    fn ignoring_dependency_blocks_drops_them() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(
            &root.join("app/terragrunt.hcl"),
            "dependency \"vpc\" {\n  config_path = \"../vpc\"\n}\n",
        );
        let flags = FlagSignature {
            cascade: false,
            ignore_dependency_blocks: true,
        };
        let set = cache()
            .build_dependencies(&root.join("app/terragrunt.hcl"), flags, &CancellationToken::new())
            .expect("resolve");
        assert_eq!(set.paths, vec![root.join("app/terragrunt.hcl")]);
    }

    #[test]
    fn unparsable_include_is_scoped_to_project() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(&root.join("root.hcl"), "locals {");
        write(
            &root.join("app/terragrunt.hcl"),
            "include {\n  path = \"../root.hcl\"\n}\n",
        );
        let result = cache().build_dependencies(
            &root.join("app/terragrunt.hcl"),
            DIRECT,
            &CancellationToken::new(),
        );
        let Err(StackgraphError::DependencyResolution { target, source, .. }) = result else {
            panic!("expected dependency resolution error, got {result:?}");
        };
        assert_eq!(target, root.join("root.hcl"));
        assert!(matches!(*source, StackgraphError::Parse { .. }));
    }

    #[test]
    fn cascade_folds_in_transitive_sets_and_survives_cycles() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        let dep = |name: &str| format!("dependency \"d\" {{\n  config_path = \"../{name}\"\n}}\n");
        write(&root.join("a/terragrunt.hcl"), &dep("b"));
        write(&root.join("b/terragrunt.hcl"), &dep("c"));
        write(
            &root.join("c/terragrunt.hcl"),
            &format!("{}locals {{\n  extra_atlantis_dependencies = [\"../c.yaml\"]\n}}\n", dep("a")),
        );

        let cache = cache();
        let token = CancellationToken::new();
        let set = cache
            .build_dependencies(&root.join("a/terragrunt.hcl"), CASCADE, &token)
            .expect("resolve");
        assert!(set.paths.contains(&root.join("c.yaml")));
        assert!(set.paths.contains(&root.join("c/terragrunt.hcl")));
    }

    #[test]
    fn cascade_reports_missing_dependency_target() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(
            &root.join("a/terragrunt.hcl"),
            "dependency \"d\" {\n  config_path = \"../missing\"\n}\n",
        );
        let result = cache().build_dependencies(
            &root.join("a/terragrunt.hcl"),
            CASCADE,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(StackgraphError::DependencyResolution { .. })
        ));
    }

    #[test]
    fn repeated_requests_are_served_from_cache() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(&root.join("a/terragrunt.hcl"), "");
        let cache = cache();
        let token = CancellationToken::new();
        let first = cache
            .build_dependencies(&root.join("a/terragrunt.hcl"), DIRECT, &token)
            .expect("resolve");
        let second = cache
            .build_dependencies(&root.join("a/../a/terragrunt.hcl"), DIRECT, &token)
            .expect("resolve");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.computations(), 1);
    }

    #[test]
    fn cancelled_outcomes_are_not_cached() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(&root.join("a/terragrunt.hcl"), "");
        let cache = cache();
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let result = cache.build_dependencies(&root.join("a/terragrunt.hcl"), DIRECT, &cancelled);
        assert!(matches!(result, Err(StackgraphError::Cancelled)));
        assert!(cache.is_empty());

        let result =
            cache.build_dependencies(&root.join("a/terragrunt.hcl"), DIRECT, &CancellationToken::new());
        assert!(result.is_ok());
    }

    #[test]
    fn locals_error_fails_the_project() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path();
        write(
            &root.join("a/terragrunt.hcl"),
            "locals {\n  extra_atlantis_dependencies = [\"x\", \"y\", \"z\", 4]\n}\n",
        );
        let result = cache().build_dependencies(
            &root.join("a/terragrunt.hcl"),
            DIRECT,
            &CancellationToken::new(),
        );
        assert!(matches!(
            result,
            Err(StackgraphError::LocalsValue { position: 4, .. })
        ));
    }
}
