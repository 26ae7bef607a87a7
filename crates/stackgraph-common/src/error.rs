//! Unified error types for the stackgraph workspace.
//!
//! File- and project-scoped variants are isolated to the project that
//! produced them; [`StackgraphError::Cycle`] and
//! [`StackgraphError::Cancelled`] are run-level.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Top-level error type shared across the workspace.
///
/// Errors are cloneable because cached outcomes are handed to every
/// coalesced caller of the same request.
#[derive(Debug, Clone, Error)]
pub enum StackgraphError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: Arc<std::io::Error>,
    },

    /// A configuration file contains malformed syntax.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        /// Description of the syntax problem.
        message: String,
    },

    /// A declaration has an invalid shape (e.g. two unlabeled includes).
    #[error("invalid declaration in {path}: {message}")]
    Structural {
        /// File containing the declaration.
        path: PathBuf,
        /// Description of the structural problem.
        message: String,
    },

    /// A list-valued local contains a value of the wrong type.
    #[error("{key} contains non-string value at position {position}")]
    LocalsValue {
        /// Name of the offending local.
        key: String,
        /// 1-based position of the offending element.
        position: usize,
    },

    /// A scalar local has the wrong type.
    #[error("{key} must be a {expected}")]
    LocalsType {
        /// Name of the offending local.
        key: String,
        /// Expected type name.
        expected: &'static str,
    },

    /// A recognized local could not be evaluated to a known value.
    #[error("{key} in {path} could not be evaluated")]
    LocalsUnresolved {
        /// File declaring the local.
        path: PathBuf,
        /// Name of the local.
        key: String,
    },

    /// A declared dependency or include target could not be resolved.
    #[error("failed to resolve dependency {target} of {project}: {source}")]
    DependencyResolution {
        /// Configuration file of the owning project.
        project: PathBuf,
        /// Target that could not be resolved.
        target: PathBuf,
        /// Underlying cause.
        source: Box<StackgraphError>,
    },

    /// Projects form a cycle and cannot be layered into execution groups.
    #[error("dependency cycle detected involving: {}", members.join(", "))]
    Cycle {
        /// Identifiers of the projects participating in the cycle.
        members: Vec<String>,
    },

    /// The run was aborted by an external shutdown request.
    #[error("run cancelled")]
    Cancelled,

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },
}

impl StackgraphError {
    /// Builds an [`StackgraphError::Io`] from a path and an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Returns `true` for errors that abort the whole run rather than a
    /// single project.
    #[must_use]
    pub const fn is_run_level(&self) -> bool {
        matches!(self, Self::Cycle { .. } | Self::Cancelled)
    }

    /// Returns `true` if this error, or the cause it wraps, is a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::DependencyResolution { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StackgraphError>;
