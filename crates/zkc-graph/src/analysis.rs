//! Graph analysis: cycle detection, execution levels, critical path,
//! bottlenecks, and the suggested parallelism the concurrency manager
//! feeds into its recommendation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{DependencyGraph, DependencyNode};

/// Everything the scheduler needs to know about a graph before running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphAnalysis {
    /// True when the graph contains at least one dependency cycle.
    /// Execution must refuse to start while this is set.
    pub has_cycles: bool,
    /// One offending cycle, first node repeated at the end. Empty when
    /// the graph is acyclic.
    pub cycle_path: Vec<String>,
    /// Topological layering: all nodes in a level are mutually
    /// independent and may run concurrently.
    pub execution_levels: Vec<Vec<String>>,
    /// Total estimated cost per level, aligned with `execution_levels`.
    pub level_costs: Vec<u64>,
    pub max_depth: usize,
    /// Highest-cost root-to-leaf path by `estimated_cost`.
    pub critical_path: Vec<String>,
    pub critical_path_cost: u64,
    /// Nodes whose cost dominates their level (more than half the level
    /// total, in levels with at least two nodes).
    pub bottlenecks: Vec<String>,
    /// The widest level's size.
    pub suggested_parallelism: usize,
}

impl GraphAnalysis {
    fn cyclic(path: Vec<String>) -> Self {
        Self {
            has_cycles: true,
            cycle_path: path,
            execution_levels: Vec::new(),
            level_costs: Vec::new(),
            max_depth: 0,
            critical_path: Vec::new(),
            critical_path_cost: 0,
            bottlenecks: Vec::new(),
            suggested_parallelism: 0,
        }
    }
}

impl DependencyGraph {
    /// Full structural analysis. Never fails: a cyclic graph yields
    /// `has_cycles = true` with the offending path, and callers must
    /// refuse to execute it.
    pub fn analyze(&self) -> GraphAnalysis {
        if let Some(path) = self.find_cycle() {
            tracing::warn!(cycle = ?path, "dependency graph contains a cycle");
            return GraphAnalysis::cyclic(path);
        }

        let execution_levels = self.execution_levels();
        let level_costs: Vec<u64> = execution_levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|id| self.node(id))
                    .map(|n| n.estimated_cost)
                    .sum()
            })
            .collect();

        let (critical_path, critical_path_cost) = self.critical_path();
        let bottlenecks = find_bottlenecks(self, &execution_levels);
        let suggested_parallelism = execution_levels
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0);

        GraphAnalysis {
            has_cycles: false,
            cycle_path: Vec::new(),
            max_depth: execution_levels.len(),
            execution_levels,
            level_costs,
            critical_path,
            critical_path_cost,
            bottlenecks,
            suggested_parallelism,
        }
    }

    /// Depth-first cycle search. Returns one cycle as a path whose first
    /// node is repeated at the end, or `None` for an acyclic graph.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            InProgress,
            Done,
        }

        fn visit(
            graph: &DependencyGraph,
            id: &str,
            marks: &mut HashMap<String, Mark>,
            stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            match marks.get(id) {
                Some(Mark::Done) => return None,
                Some(Mark::InProgress) => {
                    // Back edge: slice the current stack from the first
                    // occurrence and close the loop.
                    let start = stack.iter().position(|s| s == id).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].to_vec();
                    path.push(id.to_string());
                    return Some(path);
                }
                None => {}
            }
            marks.insert(id.to_string(), Mark::InProgress);
            stack.push(id.to_string());
            if let Some(node) = graph.node(id) {
                for dep in &node.dependencies {
                    if let Some(cycle) = visit(graph, dep, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
            stack.pop();
            marks.insert(id.to_string(), Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        let mut stack = Vec::new();
        let mut ids: Vec<&String> = self.nodes().map(|n| &n.id).collect();
        ids.sort();
        for id in ids {
            if let Some(cycle) = visit(self, id, &mut marks, &mut stack) {
                return Some(cycle);
            }
        }
        None
    }

    /// Kahn layering. Only meaningful for acyclic graphs; nodes trapped
    /// in cycles never appear.
    fn execution_levels(&self) -> Vec<Vec<String>> {
        let mut remaining_deps: HashMap<&str, HashSet<&str>> = self
            .nodes()
            .map(|n| {
                (
                    n.id.as_str(),
                    n.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut levels = Vec::new();
        while !remaining_deps.is_empty() {
            let mut level: Vec<String> = remaining_deps
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.to_string())
                .collect();
            if level.is_empty() {
                break; // cycle remnant
            }
            level.sort();
            for id in &level {
                remaining_deps.remove(id.as_str());
            }
            for deps in remaining_deps.values_mut() {
                for id in &level {
                    deps.remove(id.as_str());
                }
            }
            levels.push(level);
        }
        levels
    }

    /// Longest root-to-leaf path by accumulated `estimated_cost`,
    /// computed by dynamic programming over a topological order.
    fn critical_path(&self) -> (Vec<String>, u64) {
        let levels = self.execution_levels();
        let mut best_cost: HashMap<&str, u64> = HashMap::new();
        let mut best_pred: HashMap<&str, &str> = HashMap::new();

        for level in &levels {
            for id in level {
                let node = match self.node(id) {
                    Some(n) => n,
                    None => continue,
                };
                let (pred, upstream) = node
                    .dependencies
                    .iter()
                    .filter_map(|d| best_cost.get(d.as_str()).map(|c| (d.as_str(), *c)))
                    .max_by_key(|(_, c)| *c)
                    .map(|(d, c)| (Some(d), c))
                    .unwrap_or((None, 0));
                best_cost.insert(node.id.as_str(), upstream + node.estimated_cost);
                if let Some(pred) = pred {
                    best_pred.insert(node.id.as_str(), pred);
                }
            }
        }

        let Some((&end, &cost)) = best_cost.iter().max_by_key(|(id, c)| (**c, std::cmp::Reverse(*id)))
        else {
            return (Vec::new(), 0);
        };

        let mut path = vec![end.to_string()];
        let mut cursor = end;
        while let Some(&pred) = best_pred.get(cursor) {
            path.push(pred.to_string());
            cursor = pred;
        }
        path.reverse();
        (path, cost)
    }
}

fn find_bottlenecks(graph: &DependencyGraph, levels: &[Vec<String>]) -> Vec<String> {
    let mut bottlenecks = Vec::new();
    for level in levels {
        if level.len() < 2 {
            continue;
        }
        let total: u64 = level
            .iter()
            .filter_map(|id| graph.node(id))
            .map(|n| n.estimated_cost)
            .sum();
        for id in level {
            if let Some(node) = graph.node(id) {
                if node.estimated_cost * 2 > total {
                    bottlenecks.push(id.clone());
                }
            }
        }
    }
    bottlenecks
}
