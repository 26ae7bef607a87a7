//! # stackgraph-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the stackgraph workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives the parser, the resolver and
//! the CLI build upon, including the coalescing memo table both caches use.

pub mod coalesce;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod types;
