//! Execution ordering of projects using `petgraph`.
//!
//! Projects are nodes; an edge runs from a project to every other project
//! whose configuration file appears in its dependency set. File-level
//! dependencies that are not projects never become nodes, and neither do
//! the members a project-hcl directory folds in.

use std::collections::HashMap;
use std::path::PathBuf;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use stackgraph_common::error::{Result, StackgraphError};
use stackgraph_common::types::ProjectId;

use crate::project::ProjectNode;

/// Which ordering representations to attach to projects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderingMode {
    /// Assign `execution_order_group`.
    pub groups: bool,
    /// Assign `depends_on`.
    pub depends_on: bool,
}

/// Dependency graph of projects.
#[derive(Debug)]
pub struct ExecutionGraph {
    /// Edges point from dependency to dependent.
    graph: DiGraph<ProjectId, ()>,
}

impl ExecutionGraph {
    /// Builds the graph for `projects`; node `i` is `projects[i]`.
    #[must_use]
    pub fn build(projects: &[ProjectNode]) -> Self {
        let mut graph = DiGraph::with_capacity(projects.len(), 0);
        let mut by_file: HashMap<&PathBuf, NodeIndex> = HashMap::new();
        for project in projects {
            let idx = graph.add_node(project.id.clone());
            let _ = by_file.insert(&project.config_file, idx);
        }
        for (i, project) in projects.iter().enumerate() {
            let dependent = NodeIndex::new(i);
            for dep in project.dependencies.iter().filter(|d| !project.members.contains(*d)) {
                if let Some(&dependency) = by_file.get(dep) {
                    if dependency != dependent && graph.find_edge(dependency, dependent).is_none() {
                        let _ = graph.add_edge(dependency, dependent, ());
                    }
                }
            }
        }
        Self { graph }
    }

    /// Longest-path layer of every node: zero without dependencies,
    /// otherwise one more than the highest layer among its dependencies.
    ///
    /// # Errors
    ///
    /// Returns [`StackgraphError::Cycle`] naming the projects of a cycle.
    pub fn groups(&self) -> Result<Vec<usize>> {
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            StackgraphError::Cycle {
                members: self.cycle_members(cycle.node_id()),
            }
        })?;
        let mut groups = vec![0usize; self.graph.node_count()];
        for idx in order {
            let group = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| groups[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            groups[idx.index()] = group;
        }
        Ok(groups)
    }

    /// Sorted identifiers of the direct dependencies of node `i`.
    #[must_use]
    pub fn predecessors(&self, i: usize) -> Vec<ProjectId> {
        let mut ids: Vec<ProjectId> = self
            .graph
            .neighbors_directed(NodeIndex::new(i), Direction::Incoming)
            .filter_map(|idx| self.graph.node_weight(idx).cloned())
            .collect();
        ids.sort();
        ids
    }

    fn cycle_members(&self, start: NodeIndex) -> Vec<String> {
        let component = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| scc.contains(&start))
            .unwrap_or_else(|| vec![start]);
        let mut members: Vec<String> = component
            .into_iter()
            .filter_map(|idx| self.graph.node_weight(idx).map(ToString::to_string))
            .collect();
        members.sort();
        members
    }
}

/// Attaches the requested ordering to every project.
///
/// # Errors
///
/// Returns [`StackgraphError::Cycle`] when projects depend on each other
/// circularly.
pub fn assign_order(projects: &mut [ProjectNode], mode: OrderingMode) -> Result<()> {
    if !mode.groups && !mode.depends_on {
        return Ok(());
    }
    let graph = ExecutionGraph::build(projects);
    let groups = graph.groups()?;
    for (i, project) in projects.iter_mut().enumerate() {
        if mode.groups {
            project.execution_order_group = Some(groups[i]);
        }
        if mode.depends_on {
            project.depends_on = Some(graph.predecessors(i));
        }
    }
    Ok(())
}
