//! # Dependency Graph & Scheduler
//!
//! Builds a DAG from proof requests, detects cycles, computes execution
//! levels and the critical path, and answers incremental "ready set"
//! queries for the parallel executor.
//!
//! The graph is referenced by node id, never by pointer, so multiple
//! workers can read it concurrently. Acyclicity is a mandatory
//! precondition for execution: a cyclic graph is analyzable (the
//! analysis reports the offending path) but must never be scheduled.

pub mod analysis;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use zkc_core::{EngineError, ProofSystem};

pub use analysis::GraphAnalysis;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural errors raised while building or mutating a graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("node {node} depends on unknown node {dependency}")]
    UnknownDependency { node: String, dependency: String },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

impl From<GraphError> for EngineError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cycle { path } => EngineError::Cycle { path },
            other => EngineError::Validation(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Node and graph
// ---------------------------------------------------------------------------

/// One proof request inside a dependency graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: String,
    pub circuit_id: String,
    pub system: ProofSystem,
    /// Ids of nodes that must complete before this one may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub estimated_cost: u64,
    pub estimated_memory: u64,
    /// Scheduling tie-break only; higher runs first among ready nodes.
    pub priority: u8,
    #[serde(default)]
    pub private_inputs: serde_json::Value,
    #[serde(default)]
    pub public_inputs: Vec<String>,
}

impl DependencyNode {
    pub fn new(id: impl Into<String>, circuit_id: impl Into<String>, system: impl Into<ProofSystem>) -> Self {
        Self {
            id: id.into(),
            circuit_id: circuit_id.into(),
            system: system.into(),
            dependencies: Vec::new(),
            estimated_cost: 1,
            estimated_memory: 0,
            priority: 0,
            private_inputs: serde_json::Value::Null,
            public_inputs: Vec::new(),
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }
}

/// A dependency graph over proof requests, indexed by node id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, DependencyNode>,
    /// Nodes with no dependencies.
    roots: HashSet<String>,
    /// Nodes nothing depends on.
    leaves: HashSet<String>,
}

impl DependencyGraph {
    /// Build a graph from nodes, checking structural validity (unique
    /// ids, known dependencies). Cycles are *not* rejected here — call
    /// [`DependencyGraph::analyze`] and refuse execution when
    /// `has_cycles` is set.
    pub fn build(nodes: Vec<DependencyNode>) -> Result<Self, GraphError> {
        let mut graph = Self::default();
        let known: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();

        for node in &nodes {
            for dep in &node.dependencies {
                if !known.contains(dep) {
                    return Err(GraphError::UnknownDependency {
                        node: node.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        for node in nodes {
            if graph.nodes.contains_key(&node.id) {
                return Err(GraphError::DuplicateNode(node.id));
            }
            graph.nodes.insert(node.id.clone(), node);
        }
        graph.recompute_roots_and_leaves();
        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    pub fn roots(&self) -> &HashSet<String> {
        &self.roots
    }

    pub fn leaves(&self) -> &HashSet<String> {
        &self.leaves
    }

    /// Nodes whose dependencies are all in `completed`, excluding nodes
    /// already completed, ordered by descending priority then ascending
    /// estimated cost. The ordering is a scheduling tie-break, not a
    /// correctness requirement.
    pub fn ready_nodes(&self, completed: &HashSet<String>) -> Vec<&DependencyNode> {
        let mut ready: Vec<&DependencyNode> = self
            .nodes
            .values()
            .filter(|n| !completed.contains(&n.id))
            .filter(|n| n.dependencies.iter().all(|d| completed.contains(d)))
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.estimated_cost.cmp(&b.estimated_cost))
                .then(a.id.cmp(&b.id))
        });
        ready
    }

    /// Add a node whose dependencies must already be present, preserving
    /// the root and leaf sets incrementally.
    pub fn add_node(&mut self, node: DependencyNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        for dep in &node.dependencies {
            if !self.nodes.contains_key(dep) {
                return Err(GraphError::UnknownDependency {
                    node: node.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if node.dependencies.is_empty() {
            self.roots.insert(node.id.clone());
        }
        // The new node depends on its deps, so they are no longer leaves.
        for dep in &node.dependencies {
            self.leaves.remove(dep);
        }
        self.leaves.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Remove a node, stripping it from the dependency lists of the
    /// remaining nodes (dependents become eligible once their other
    /// dependencies complete). Returns the removed node.
    pub fn remove_node(&mut self, id: &str) -> Result<DependencyNode, GraphError> {
        let removed = self
            .nodes
            .remove(id)
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))?;
        for node in self.nodes.values_mut() {
            node.dependencies.retain(|d| d != id);
        }
        self.recompute_roots_and_leaves();
        Ok(removed)
    }

    fn recompute_roots_and_leaves(&mut self) {
        let mut depended_on: HashSet<&str> = HashSet::new();
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                depended_on.insert(dep.as_str());
            }
        }
        self.roots = self
            .nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.clone())
            .collect();
        self.leaves = self
            .nodes
            .keys()
            .filter(|id| !depended_on.contains(id.as_str()))
            .cloned()
            .collect();
    }

    /// A valid topological order, or the cycle that prevents one.
    pub fn execution_order(&self) -> Result<Vec<String>, GraphError> {
        let analysis = self.analyze();
        if analysis.has_cycles {
            return Err(GraphError::Cycle {
                path: analysis.cycle_path,
            });
        }
        Ok(analysis.execution_levels.into_iter().flatten().collect())
    }
}
