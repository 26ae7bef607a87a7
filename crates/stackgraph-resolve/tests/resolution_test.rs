//! End-to-end resolution tests on on-disk project trees.
//!
//! Covers:
//! 1. Dependency sets (include chain, extra paths, cascade closure)
//! 2. Cache behavior (coalescing, modification-time invalidation)
//! 3. Whole runs (cycles, locals errors, project-hcl directories, filters)

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::time::{Duration, SystemTime};

use stackgraph_common::config::ResolveConfig;
use stackgraph_common::error::StackgraphError;
use stackgraph_common::types::FlagSignature;
use stackgraph_hcl::ParseCache;
use stackgraph_resolve::{DependencyCache, DependencySet, Resolver};
use tokio_util::sync::CancellationToken;

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

fn depends_on(target: &str) -> String {
    format!("dependency \"{target}\" {{\n  config_path = \"../{target}\"\n}}\n")
}

fn resolve(cache: &DependencyCache, file: &Path, flags: FlagSignature) -> Arc<DependencySet> {
    cache
        .build_dependencies(file, flags, &CancellationToken::new())
        .expect("should resolve")
}

fn config(root: &Path) -> ResolveConfig {
    ResolveConfig {
        root: root.to_path_buf(),
        num_executors: 4,
        ..ResolveConfig::default()
    }
}

fn candidates(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir).expect("read_dir") {
            let path = entry.expect("entry").path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.extension().is_some_and(|e| e == "hcl") {
                out.push(path);
            }
        }
    }
    out
}

// ── Dependency sets ──────────────────────────────────────────────────

#[test]
fn include_and_extra_dependency_scenario() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("root.hcl"), "locals {\n  atlantis_workflow = \"default\"\n}\n");
    write(
        &root.join("A/terragrunt.hcl"),
        r#"
include "root" {
  path = find_in_parent_folders("root.hcl")
}

locals {
  extra_atlantis_dependencies = ["../shared"]
}
"#,
    );
    fs::create_dir_all(root.join("shared")).expect("mkdir");

    let cache = DependencyCache::new(Arc::new(ParseCache::new()));
    let set = resolve(&cache, &root.join("A/terragrunt.hcl"), DIRECT);

    let expected: Vec<PathBuf> = [
        root.join("A/terragrunt.hcl"),
        root.join("root.hcl"),
        root.join("shared/**/*"),
    ]
    .into_iter()
    .collect::<BTreeSet<_>>()
    .into_iter()
    .collect();
    assert_eq!(set.paths, expected);
    assert_eq!(set.locals.workflow.as_deref(), Some("default"));
}

#[test]
fn cascade_set_is_strict_superset_of_direct_set() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("A/terragrunt.hcl"), &depends_on("B"));
    write(&root.join("B/terragrunt.hcl"), &depends_on("C"));
    write(
        &root.join("C/terragrunt.hcl"),
        "locals {\n  extra_atlantis_dependencies = [\"../c.yaml\"]\n}\n",
    );

    let cache = DependencyCache::new(Arc::new(ParseCache::new()));
    let direct = resolve(&cache, &root.join("A/terragrunt.hcl"), DIRECT);
    let cascade = resolve(&cache, &root.join("A/terragrunt.hcl"), CASCADE);
    let c_direct = resolve(&cache, &root.join("C/terragrunt.hcl"), DIRECT);

    let direct: BTreeSet<_> = direct.paths.iter().collect();
    let cascade: BTreeSet<_> = cascade.paths.iter().collect();
    assert!(direct.is_subset(&cascade));
    assert!(cascade.len() > direct.len());
    for path in &c_direct.paths {
        assert!(cascade.contains(path), "missing {}", path.display());
    }
}

#[test]
fn cascade_output_is_sorted_and_unique() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(
        &root.join("A/terragrunt.hcl"),
        &format!("{}{}", depends_on("C"), depends_on("B")),
    );
    write(&root.join("B/terragrunt.hcl"), &depends_on("C"));
    write(&root.join("C/terragrunt.hcl"), "");

    let cache = DependencyCache::new(Arc::new(ParseCache::new()));
    let set = resolve(&cache, &root.join("A/terragrunt.hcl"), CASCADE);
    let mut sorted = set.paths.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(set.paths, sorted);
}

// ── Caches ───────────────────────────────────────────────────────────

#[test]
fn concurrent_identical_requests_share_one_computation() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("app/terragrunt.hcl"), &depends_on("vpc"));
    let file = root.join("app/terragrunt.hcl");

    let cache = DependencyCache::new(Arc::new(ParseCache::new()));
    let barrier = Barrier::new(10);
    let results: Vec<Arc<DependencySet>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..10)
            .map(|_| {
                scope.spawn(|| {
                    let _ = barrier.wait();
                    resolve(&cache, &file, DIRECT)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    assert_eq!(cache.computations(), 1);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
}

#[test]
fn modified_file_invalidates_dependency_entry() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    let file = root.join("app/terragrunt.hcl");
    write(&file, &depends_on("vpc"));

    let parse = Arc::new(ParseCache::new());
    let cache = DependencyCache::new(Arc::clone(&parse));
    let before = resolve(&cache, &file, DIRECT);
    let again = resolve(&cache, &file, DIRECT);
    assert!(Arc::ptr_eq(&before, &again));
    assert_eq!(parse.parse_count(), 1);

    write(&file, &depends_on("db"));
    File::options()
        .write(true)
        .open(&file)
        .expect("open")
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .expect("set mtime");

    let after = resolve(&cache, &file, DIRECT);
    assert_eq!(parse.parse_count(), 2);
    assert!(after.paths.contains(&root.join("db/terragrunt.hcl")));
    assert!(!after.paths.contains(&root.join("vpc/terragrunt.hcl")));
}

// ── Whole runs ───────────────────────────────────────────────────────

#[tokio::test]
async fn three_project_cycle_is_a_cycle_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("A/terragrunt.hcl"), &depends_on("B"));
    write(&root.join("B/terragrunt.hcl"), &depends_on("C"));
    write(&root.join("C/terragrunt.hcl"), &depends_on("A"));

    for cascade_dependencies in [true, false] {
        let resolver = Resolver::new(ResolveConfig {
            execution_order_groups: true,
            cascade_dependencies,
            ignore_parent_terragrunt: false,
            ..config(root)
        })
        .expect("resolver");
        let result = resolver
            .run(candidates(root), &CancellationToken::new())
            .await;
        let Err(StackgraphError::Cycle { members }) = result else {
            panic!("expected a cycle error, got {result:?}");
        };
        assert_eq!(members, vec!["A", "B", "C"]);
    }
}

#[tokio::test]
async fn non_string_extra_dependency_fails_only_that_project() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(
        &root.join("bad/terragrunt.hcl"),
        r#"
terraform {
  source = "./m"
}
locals {
  extra_atlantis_dependencies = ["a", "b", "c", true]
}
"#,
    );
    write(&root.join("good/terragrunt.hcl"), "terraform {\n  source = \"./m\"\n}\n");

    let resolver = Resolver::new(config(root)).expect("resolver");
    let report = resolver
        .run(candidates(root), &CancellationToken::new())
        .await
        .expect("run");

    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].id.as_str(), "good");
    assert_eq!(report.failures.len(), 1);
    let message = report.failures[0].error.to_string();
    assert!(message.contains("position 4"), "got: {message}");
}

#[tokio::test]
async fn parent_and_skipped_configurations_are_not_projects() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("terragrunt.hcl"), "locals {\n  atlantis_autoplan = true\n}\n");
    write(
        &root.join("app/terragrunt.hcl"),
        "include {\n  path = find_in_parent_folders()\n}\n",
    );
    write(
        &root.join("skipped/terragrunt.hcl"),
        "include {\n  path = find_in_parent_folders()\n}\nlocals {\n  atlantis_skip = true\n}\n",
    );

    let resolver = Resolver::new(config(root)).expect("resolver");
    let report = resolver
        .run(candidates(root), &CancellationToken::new())
        .await
        .expect("run");
    let ids: Vec<&str> = report.projects.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["app"]);
    assert!(report.projects[0].autoplan);
    assert_eq!(
        report.projects[0].trigger_paths(),
        vec!["*.hcl", "*.tf*", "../terragrunt.hcl", "terragrunt.hcl"]
    );
}

#[tokio::test]
async fn project_hcl_directories_absorb_their_children() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(
        &root.join("env/env.hcl"),
        "locals {\n  atlantis_project = true\n  atlantis_workflow = \"env\"\n}\n",
    );
    write(&root.join("env/app/terragrunt.hcl"), "terraform {\n  source = \"./m\"\n}\n");
    write(
        &root.join("shared/x/terragrunt.hcl"),
        "include \"env\" {\n  path = \"../../env/env.hcl\"\n}\n",
    );
    write(&root.join("other/terragrunt.hcl"), "terraform {\n  source = \"./m\"\n}\n");
    write(&root.join("unmarked/env.hcl"), "");

    let resolver = Resolver::new(ResolveConfig {
        project_hcl_files: vec!["env.hcl".into()],
        use_project_markers: true,
        create_hcl_project_childs: true,
        create_hcl_project_external_childs: false,
        ..config(root)
    })
    .expect("resolver");
    let report = resolver
        .run(candidates(root), &CancellationToken::new())
        .await
        .expect("run");

    let ids: Vec<&str> = report.projects.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["env", "env/app"]);
    let env = &report.projects[0];
    assert_eq!(env.workflow.as_deref(), Some("env"));
    assert!(env.dependencies.contains(&root.join("env/env.hcl")));
    assert!(env.dependencies.contains(&root.join("env/app/terragrunt.hcl")));
    assert!(env.dependencies.contains(&root.join("shared/x/terragrunt.hcl")));
    assert!(!env.dependencies.contains(&root.join("other/terragrunt.hcl")));
}

#[tokio::test]
async fn project_hcl_children_are_ordered_after_their_directory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("env/env.hcl"), "locals {\n  atlantis_workflow = \"env\"\n}\n");
    write(
        &root.join("env/app/terragrunt.hcl"),
        "include \"env\" {\n  path = find_in_parent_folders(\"env.hcl\")\n}\nterraform {\n  source = \"./m\"\n}\n",
    );

    let resolver = Resolver::new(ResolveConfig {
        project_hcl_files: vec!["env.hcl".into()],
        create_hcl_project_childs: true,
        execution_order_groups: true,
        depends_on: true,
        ..config(root)
    })
    .expect("resolver");
    let report = resolver
        .run(candidates(root), &CancellationToken::new())
        .await
        .expect("acyclic tree must order");

    let groups: Vec<(&str, Option<usize>)> = report
        .projects
        .iter()
        .map(|p| (p.id.as_str(), p.execution_order_group))
        .collect();
    assert_eq!(groups, vec![("env", Some(0)), ("env/app", Some(1))]);
    let env = &report.projects[0];
    assert!(env.trigger_paths().contains(&"app/terragrunt.hcl".to_string()));
    assert_eq!(env.members, vec![root.join("env/app/terragrunt.hcl")]);
}

#[tokio::test]
async fn filters_restrict_emitted_projects() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    for dir in ["prod/app", "prod/db", "dev/app"] {
        write(
            &root.join(dir).join("terragrunt.hcl"),
            "terraform {\n  source = \"./m\"\n}\n",
        );
    }
    let resolver = Resolver::new(ResolveConfig {
        filter_paths: vec![PathBuf::from("prod")],
        ..config(root)
    })
    .expect("resolver");
    let report = resolver
        .run(candidates(root), &CancellationToken::new())
        .await
        .expect("run");
    let ids: Vec<&str> = report.projects.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["prod/app", "prod/db"]);
}

#[tokio::test]
async fn runs_are_deterministic_across_pool_widths() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let root = tmp.path();
    write(&root.join("a/terragrunt.hcl"), &depends_on("b"));
    write(&root.join("b/terragrunt.hcl"), &depends_on("c"));
    write(&root.join("c/terragrunt.hcl"), "terraform {\n  source = \"./m\"\n}\n");
    write(&root.join("d/terragrunt.hcl"), &depends_on("a"));

    let mut reports = Vec::new();
    for num_executors in [1, 8] {
        let resolver = Resolver::new(ResolveConfig {
            num_executors,
            ignore_parent_terragrunt: false,
            depends_on: true,
            execution_order_groups: true,
            ..config(root)
        })
        .expect("resolver");
        reports.push(
            resolver
                .run(candidates(root), &CancellationToken::new())
                .await
                .expect("run")
                .projects,
        );
    }
    assert_eq!(reports[0], reports[1]);
    let groups: Vec<Option<usize>> = reports[0].iter().map(|p| p.execution_order_group).collect();
    assert_eq!(groups, vec![Some(2), Some(1), Some(0), Some(3)]);
}
