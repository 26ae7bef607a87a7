//! Local module source extraction.
//!
//! Walks `module` blocks in the infrastructure files of a directory,
//! follows the ones whose literal `source` is a relative path, and
//! collects trigger globs for every module directory reached.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use stackgraph_common::constants::{LOCAL_SOURCE_PREFIXES, MODULE_FILE_PATTERNS, MODULE_TRIGGER_GLOBS};
use stackgraph_common::paths::{FileStamp, absolutize, normalize};
use stackgraph_hcl::ParseCache;

/// Returns `true` if a module source is a relative on-disk path.
#[must_use]
pub fn is_local(source: &str) -> bool {
    LOCAL_SOURCE_PREFIXES
        .iter()
        .any(|prefix| source.starts_with(prefix))
}

/// Trigger globs for every local module reachable from `dir`.
///
/// `dir` itself contributes no globs; only module directories do.
pub fn extract(cache: &ParseCache, dir: &Path) -> BTreeSet<PathBuf> {
    let mut walk = ModuleWalk::default();
    walk.visit(cache, dir);
    walk.globs
}

/// State of one recursive module walk.
#[derive(Debug, Default)]
pub(crate) struct ModuleWalk {
    visited: HashSet<PathBuf>,
    /// Collected trigger globs.
    pub globs: BTreeSet<PathBuf>,
    /// Files read during the walk, with their observed modification times.
    pub inputs: Vec<FileStamp>,
}

impl ModuleWalk {
    /// Scans `dir` and recurses into each local module it calls.
    pub fn visit(&mut self, cache: &ParseCache, dir: &Path) {
        let dir = normalize(dir);
        if !self.visited.insert(dir.clone()) {
            return;
        }

        for source in self.module_sources(cache, &dir) {
            let module_dir = absolutize(&dir, Path::new(&source.replace('\\', "/")));
            if !module_dir.is_dir() {
                tracing::debug!(
                    dir = %dir.display(),
                    source = %source,
                    "local module directory does not exist"
                );
                continue;
            }
            for pattern in MODULE_TRIGGER_GLOBS {
                let _ = self.globs.insert(module_dir.join(pattern));
            }
            self.visit(cache, &module_dir);
        }
    }

    fn module_sources(&mut self, cache: &ParseCache, dir: &Path) -> Vec<String> {
        let mut sources = Vec::new();
        for file in module_files(dir) {
            let parsed = cache.parse(&file);
            self.inputs.push(FileStamp {
                path: parsed.path.clone(),
                modified: parsed.modified,
            });
            let body = match parsed.body() {
                Ok(body) => body,
                Err(e) => {
                    tracing::debug!(file = %file.display(), error = %e, "skipping unreadable module file");
                    continue;
                }
            };
            for module in body.blocks_of("module") {
                let Some(source) = module
                    .body
                    .attribute("source")
                    .and_then(|a| a.expr.as_literal_str())
                else {
                    continue;
                };
                if is_local(source) {
                    sources.push(source.to_string());
                }
            }
        }
        sources
    }
}

fn module_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = BTreeSet::new();
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    for pattern in MODULE_FILE_PATTERNS {
        let Ok(paths) = glob::glob(&format!("{escaped}/{pattern}")) else {
            continue;
        };
        for path in paths.flatten() {
            if path.is_file() {
                let _ = files.insert(path);
            }
        }
    }
    files.into_iter().collect()
}
