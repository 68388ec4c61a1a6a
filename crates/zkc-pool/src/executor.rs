//! # Dependency-Graph Parallel Executor
//!
//! Drives a [`DependencyGraph`] through the worker pool: nodes are
//! submitted as their dependencies complete, so independent subtrees
//! run concurrently up to the pool's worker bound. A failed node blocks
//! its dependents (they never become ready) but does not abort siblings
//! already in flight.
//!
//! Acyclicity is checked up front; execution refuses to start on a
//! cyclic graph. Cancellation is honored between task completions and
//! never interrupts an in-flight provider call.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use zkc_core::{CancellationToken, EngineError, Event, SingleProof};
use zkc_graph::DependencyGraph;

use crate::pool::WorkerPool;
use crate::task::{Task, TaskResult};

/// Outcome of one graph execution.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Per-task outcomes in completion order.
    pub results: Vec<TaskResult>,
    /// Proofs from successful nodes, in completion order.
    pub proofs: Vec<SingleProof>,
    pub completed: usize,
    pub failed: usize,
    /// Highest number of tasks observed running at once.
    pub max_parallelism: usize,
    pub duration_ms: u64,
}

impl ExecutionReport {
    /// True when every node completed successfully.
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Schedules dependency-graph nodes onto a worker pool.
pub struct ParallelExecutor {
    pool: Arc<WorkerPool>,
    /// Per-task generation retries handed to the pool.
    max_task_retries: u32,
}

impl ParallelExecutor {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            max_task_retries: 0,
        }
    }

    pub fn with_task_retries(mut self, retries: u32) -> Self {
        self.max_task_retries = retries;
        self
    }

    /// Execute every node of `graph`, respecting dependencies.
    ///
    /// Fails immediately with [`EngineError::Cycle`] on a cyclic graph
    /// and with [`EngineError::Cancelled`] when the token fires between
    /// completions.
    pub async fn execute(
        &self,
        graph: &DependencyGraph,
        token: &CancellationToken,
    ) -> Result<ExecutionReport, EngineError> {
        let analysis = graph.analyze();
        if analysis.has_cycles {
            return Err(EngineError::Cycle {
                path: analysis.cycle_path,
            });
        }

        let started = Instant::now();
        self.pool.reset_parallelism_peak();

        let mut completed: HashSet<String> = HashSet::new();
        let mut scheduled: HashSet<String> = HashSet::new();
        let mut in_flight: JoinSet<(String, Option<TaskResult>)> = JoinSet::new();
        let mut results: Vec<TaskResult> = Vec::new();
        let mut proofs: Vec<SingleProof> = Vec::new();
        let mut failed = 0usize;

        self.schedule_ready(graph, &completed, &mut scheduled, &mut in_flight, token)?;

        while let Some(joined) = in_flight.join_next().await {
            let (node_id, delivered) = joined
                .map_err(|e| EngineError::Composition(format!("executor task failed: {e}")))?;
            match delivered {
                Some(task_result) => {
                    if task_result.result.success {
                        completed.insert(node_id);
                        if let Some(proof) = task_result.result.proof.clone() {
                            proofs.push(proof);
                        }
                    } else {
                        tracing::warn!(
                            node_id = %node_id,
                            error = task_result.result.error.as_deref().unwrap_or("unknown"),
                            "node generation failed, dependents blocked"
                        );
                        failed += 1;
                    }
                    results.push(task_result);
                }
                None => {
                    // The pool dropped the reply channel (shutdown race).
                    failed += 1;
                }
            }
            token.check()?;
            self.schedule_ready(graph, &completed, &mut scheduled, &mut in_flight, token)?;
        }

        let report = ExecutionReport {
            completed: completed.len(),
            failed,
            max_parallelism: self.pool.peak_parallelism(),
            duration_ms: started.elapsed().as_millis() as u64,
            results,
            proofs,
        };
        self.pool.event_bus().emit(&Event::AllTasksCompleted {
            total: report.results.len(),
            failed: report.failed,
            max_parallelism: report.max_parallelism,
        });
        Ok(report)
    }

    fn schedule_ready(
        &self,
        graph: &DependencyGraph,
        completed: &HashSet<String>,
        scheduled: &mut HashSet<String>,
        in_flight: &mut JoinSet<(String, Option<TaskResult>)>,
        token: &CancellationToken,
    ) -> Result<(), EngineError> {
        for node in graph.ready_nodes(completed) {
            if scheduled.contains(&node.id) {
                continue;
            }
            token.check()?;
            let receiver = self.pool.submit(Task::new(node.clone(), self.max_task_retries))?;
            scheduled.insert(node.id.clone());
            let node_id = node.id.clone();
            in_flight.spawn(async move { (node_id, receiver.await.ok()) });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zkc_core::EventBus;
    use zkc_graph::DependencyNode;
    use zkc_provider::{MockProvider, ProofProvider};

    use crate::pool::{PoolConfig, ProviderFactory};

    fn pool(workers: usize, latency: Duration) -> Arc<WorkerPool> {
        let factory: ProviderFactory = Arc::new(move |index| {
            Arc::new(
                MockProvider::new("groth16")
                    .with_id(format!("mock-{index}"))
                    .with_circuit("transfer", "1.0.0")
                    .with_latency(latency)
                    .ready(),
            ) as Arc<dyn ProofProvider>
        });
        Arc::new(WorkerPool::new(
            PoolConfig {
                min_workers: 1,
                max_workers: workers,
                initial_workers: workers,
                max_task_retries: 0,
            },
            factory,
            EventBus::new(),
        ))
    }

    fn diamond() -> DependencyGraph {
        DependencyGraph::build(vec![
            DependencyNode::new("root", "transfer", "groth16"),
            DependencyNode::new("left", "transfer", "groth16").depends_on(&["root"]),
            DependencyNode::new("right", "transfer", "groth16").depends_on(&["root"]),
            DependencyNode::new("merge", "transfer", "groth16").depends_on(&["left", "right"]),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn diamond_runs_all_nodes_with_bounded_parallelism() {
        let pool = pool(2, Duration::from_millis(30));
        let executor = ParallelExecutor::new(Arc::clone(&pool));
        let report = executor
            .execute(&diamond(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(report.proofs.len(), 4);
        assert_eq!(report.max_parallelism, 2, "left/right overlap");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cyclic_graph_refused_outright() {
        let graph = DependencyGraph::build(vec![
            DependencyNode::new("a", "transfer", "groth16").depends_on(&["b"]),
            DependencyNode::new("b", "transfer", "groth16").depends_on(&["a"]),
        ])
        .unwrap();
        let pool = pool(1, Duration::ZERO);
        let executor = ParallelExecutor::new(Arc::clone(&pool));
        let err = executor
            .execute(&graph, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cycle { .. }));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn failed_node_blocks_dependents_only() {
        // One shared provider so the scripted failure lands on "root".
        let provider = Arc::new(
            MockProvider::new("groth16")
                .with_circuit("transfer", "1.0.0")
                .ready(),
        );
        provider.fail_next(1);
        let provider_for_factory = Arc::clone(&provider);
        let pool = Arc::new(WorkerPool::new(
            PoolConfig {
                min_workers: 1,
                max_workers: 1,
                initial_workers: 1,
                max_task_retries: 0,
            },
            Arc::new(move |_| provider_for_factory.clone() as Arc<dyn ProofProvider>),
            EventBus::new(),
        ));

        let graph = DependencyGraph::build(vec![
            DependencyNode::new("root", "transfer", "groth16"),
            DependencyNode::new("child", "transfer", "groth16").depends_on(&["root"]),
        ])
        .unwrap();

        let executor = ParallelExecutor::new(Arc::clone(&pool));
        let report = executor
            .execute(&graph, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.success());
        assert_eq!(report.failed, 1);
        assert_eq!(report.completed, 0);
        // The child never ran.
        assert_eq!(report.results.len(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancellation_between_tasks() {
        let pool = pool(1, Duration::from_millis(20));
        let executor = ParallelExecutor::new(Arc::clone(&pool));
        let token = CancellationToken::new();

        let graph = DependencyGraph::build(vec![
            DependencyNode::new("a", "transfer", "groth16"),
            DependencyNode::new("b", "transfer", "groth16").depends_on(&["a"]),
            DependencyNode::new("c", "transfer", "groth16").depends_on(&["b"]),
        ])
        .unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let err = executor.execute(&graph, &token).await.unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
        pool.shutdown().await;
    }
}
