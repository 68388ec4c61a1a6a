//! # Concurrency Manager & Worker Pool
//!
//! Bounds proof-generation parallelism to host resources and runs a
//! fixed-range pool of long-lived workers with work-stealing load
//! balancing. The [`executor::ParallelExecutor`] drives a dependency
//! graph through the pool, scheduling nodes as their dependencies
//! complete.
//!
//! Ownership discipline: each worker exclusively owns its queue; a task
//! moves between queues only via the explicit steal operation, which is
//! the single sanctioned cross-worker mutation.

pub mod concurrency;
pub mod executor;
pub mod pool;
pub mod task;

pub use concurrency::{ConcurrencyConfig, ConcurrencyManager, ResourceSnapshot};
pub use executor::{ExecutionReport, ParallelExecutor};
pub use pool::{PoolConfig, ProviderFactory, WorkerPool};
pub use task::{Task, TaskResult, TaskStatus, WorkerInfo, WorkerStatus};
