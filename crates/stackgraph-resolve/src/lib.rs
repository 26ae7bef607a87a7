//! # stackgraph-resolve
//!
//! Dependency graph resolution for terragrunt project trees.
//!
//! Given candidate configuration files, the [`orchestrator::Resolver`]
//! computes each project's dependency set (include chain, dependency
//! blocks, local module sources, extra declared paths), optionally folds
//! in dependencies transitively, and orders projects into execution
//! groups.

pub mod config_file;
pub mod dependencies;
pub mod graph;
pub mod locals;
pub mod modules;
pub mod orchestrator;
pub mod project;

pub use dependencies::{DependencyCache, DependencySet};
pub use locals::ResolvedLocals;
pub use orchestrator::{Resolver, RunReport};
pub use project::{ProjectFailure, ProjectNode};
