//! Task and worker records shared between the pool and the executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zkc_core::GenerationResult;
use zkc_graph::DependencyNode;

/// Lifecycle of a pool task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
}

/// One unit of work: generate the proof for one dependency-graph node.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub node: DependencyNode,
    pub priority: u8,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Task {
    pub fn new(node: DependencyNode, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority: node.priority,
            node,
            status: TaskStatus::Pending,
            retry_count: 0,
            max_retries,
        }
    }
}

/// Outcome of one task, delivered to the submitter.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub node_id: String,
    pub worker_id: usize,
    pub attempts: u32,
    pub result: GenerationResult,
}

/// Whether a worker is currently executing a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// Point-in-time snapshot of one worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: usize,
    pub status: WorkerStatus,
    pub current_task: Option<Uuid>,
    pub queue_len: usize,
    pub tasks_completed: u64,
    pub total_execution_time: Duration,
    /// Estimated working set of the running task, bytes.
    pub memory_usage: u64,
}
