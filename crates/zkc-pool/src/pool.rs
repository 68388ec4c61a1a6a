//! # Work-Stealing Worker Pool
//!
//! A fixed-range pool of long-lived workers, each bound to its own
//! provider instance for isolation. `submit` places a task on the idle
//! worker with the shortest queue; when a worker runs dry it steals the
//! most recently queued task (LIFO) from the worker with the longest
//! queue, rebalancing skewed task costs without centralized
//! coordination.
//!
//! Locking discipline: worker queues live behind per-worker mutexes and
//! at most one queue lock is held at a time — a steal locks the victim
//! only after releasing its own queue.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use zkc_core::{EngineError, Event, EventBus, GenerationResult, ProofRequest};
use zkc_provider::ProofProvider;

use crate::task::{Task, TaskResult, TaskStatus, WorkerInfo, WorkerStatus};

/// Sizing and retry knobs for the pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    /// Workers accepting work at startup; `scale` adjusts within bounds.
    pub initial_workers: usize,
    /// Per-task generation retries before the task is reported failed.
    pub max_task_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: 4,
            initial_workers: 2,
            max_task_retries: 0,
        }
    }
}

/// Factory producing one provider instance per worker.
pub type ProviderFactory = Arc<dyn Fn(usize) -> Arc<dyn ProofProvider> + Send + Sync>;

struct QueuedTask {
    task: Task,
    reply: oneshot::Sender<TaskResult>,
}

#[derive(Default)]
struct WorkerState {
    queue: std::collections::VecDeque<QueuedTask>,
    current_task: Option<Uuid>,
    tasks_completed: u64,
    total_execution_time: Duration,
    memory_usage: u64,
}

struct PoolShared {
    workers: Vec<Mutex<WorkerState>>,
    /// How many workers currently accept new work.
    active_workers: AtomicUsize,
    paused: AtomicBool,
    shutdown: AtomicBool,
    /// Tasks submitted but not yet reported.
    in_flight: AtomicUsize,
    /// Currently running tasks, with the observed peak.
    running: AtomicUsize,
    peak_running: AtomicUsize,
    notify: Notify,
    drained: Notify,
}

impl PoolShared {
    fn total_queued(&self) -> usize {
        self.workers.iter().map(|w| w.lock().queue.len()).sum()
    }
}

/// The worker pool. Dropping it without `shutdown` aborts workers.
pub struct WorkerPool {
    config: PoolConfig,
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    bus: EventBus,
}

impl WorkerPool {
    /// Spawn `max_workers` long-lived workers, `initial_workers` of them
    /// active. Each worker gets its own provider from `factory`.
    pub fn new(config: PoolConfig, factory: ProviderFactory, bus: EventBus) -> Self {
        let max_workers = config.max_workers.max(config.min_workers).max(1);
        let initial = config
            .initial_workers
            .clamp(config.min_workers.max(1), max_workers);

        let shared = Arc::new(PoolShared {
            workers: (0..max_workers).map(|_| Mutex::new(WorkerState::default())).collect(),
            active_workers: AtomicUsize::new(initial),
            paused: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
            notify: Notify::new(),
            drained: Notify::new(),
        });

        let handles = (0..max_workers)
            .map(|index| {
                let provider = factory(index);
                spawn_worker(Arc::clone(&shared), index, provider, bus.clone())
            })
            .collect();

        Self {
            config,
            shared,
            handles: Mutex::new(handles),
            bus,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.active_workers.load(Ordering::SeqCst)
    }

    /// Queue a task and receive its result on the returned channel.
    ///
    /// Placement: the idle active worker with the shortest queue, or the
    /// shortest queue overall when every worker is busy.
    pub fn submit(&self, task: Task) -> Result<oneshot::Receiver<TaskResult>, EngineError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Validation("worker pool is shut down".into()));
        }
        let active = self.shared.active_workers.load(Ordering::SeqCst);
        let mut best: Option<(usize, usize, bool)> = None; // (index, queue_len, idle)
        for index in 0..active {
            let state = self.shared.workers[index].lock();
            let idle = state.current_task.is_none();
            let len = state.queue.len();
            drop(state);
            let better = match best {
                None => true,
                // Idle beats busy; then shorter queue wins.
                Some((_, best_len, best_idle)) => {
                    (idle && !best_idle) || (idle == best_idle && len < best_len)
                }
            };
            if better {
                best = Some((index, len, idle));
            }
        }
        let (index, _, _) = best
            .ok_or_else(|| EngineError::Validation("worker pool has no active workers".into()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.workers[index].lock();
            let mut task = task;
            task.status = TaskStatus::Queued;
            state.queue.push_back(QueuedTask { task, reply: tx });
        }
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        Ok(rx)
    }

    /// Change the number of workers accepting new tasks. Clamped to
    /// `[min_workers, max_workers]`; never interrupts running tasks.
    pub fn scale(&self, target: usize) -> usize {
        let clamped = target.clamp(self.config.min_workers.max(1), self.shared.workers.len());
        self.shared.active_workers.store(clamped, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        clamped
    }

    /// Stop dequeuing; queued tasks stay queued, running tasks finish.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Highest number of tasks observed running at once since the last
    /// [`WorkerPool::reset_parallelism_peak`].
    pub fn peak_parallelism(&self) -> usize {
        self.shared.peak_running.load(Ordering::SeqCst)
    }

    pub fn reset_parallelism_peak(&self) {
        self.shared.peak_running.store(0, Ordering::SeqCst);
    }

    /// Snapshot of one worker, or `None` for an out-of-range id.
    pub fn worker_info(&self, id: usize) -> Option<WorkerInfo> {
        let state = self.shared.workers.get(id)?.lock();
        Some(WorkerInfo {
            id,
            status: if state.current_task.is_some() {
                WorkerStatus::Busy
            } else {
                WorkerStatus::Idle
            },
            current_task: state.current_task,
            queue_len: state.queue.len(),
            tasks_completed: state.tasks_completed,
            total_execution_time: state.total_execution_time,
            memory_usage: state.memory_usage,
        })
    }

    /// Drain every submitted task, then stop all workers. Idempotent.
    pub async fn shutdown(&self) {
        // Shutdown overrides pause so queued tasks can drain.
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.notify.notify_waiters();

        while self.shared.in_flight.load(Ordering::SeqCst) > 0 {
            let drained = self.shared.drained.notified();
            if self.shared.in_flight.load(Ordering::SeqCst) == 0 {
                break;
            }
            drained.await;
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!("worker pool shut down");
    }

    pub(crate) fn event_bus(&self) -> &EventBus {
        &self.bus
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
        for handle in self.handles.lock().iter() {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

fn spawn_worker(
    shared: Arc<PoolShared>,
    index: usize,
    provider: Arc<dyn ProofProvider>,
    bus: EventBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wakeup = shared.notify.notified();
            match take_job(&shared, index) {
                Some(job) => run_task(&shared, index, &*provider, &bus, job).await,
                None => {
                    if shared.shutdown.load(Ordering::SeqCst) && shared.total_queued() == 0 {
                        break;
                    }
                    wakeup.await;
                }
            }
        }
        tracing::trace!(worker_id = index, "worker stopped");
    })
}

/// Pop from the worker's own queue (FIFO), or steal the most recently
/// queued task (LIFO) from the longest queue. Inactive workers only
/// drain their own backlog; paused pools yield nothing until resumed or
/// shut down.
fn take_job(shared: &PoolShared, index: usize) -> Option<QueuedTask> {
    if shared.paused.load(Ordering::SeqCst) && !shared.shutdown.load(Ordering::SeqCst) {
        return None;
    }
    if let Some(job) = shared.workers[index].lock().queue.pop_front() {
        return Some(job);
    }
    let active = shared.active_workers.load(Ordering::SeqCst);
    if index >= active {
        return None;
    }
    // Pick the victim without holding any lock across workers, then
    // re-check under the victim's lock.
    let victim = (0..shared.workers.len())
        .filter(|&i| i != index)
        .map(|i| (i, shared.workers[i].lock().queue.len()))
        .max_by_key(|&(_, len)| len)
        .filter(|&(_, len)| len > 0)
        .map(|(i, _)| i)?;
    let stolen = shared.workers[victim].lock().queue.pop_back();
    if stolen.is_some() {
        tracing::trace!(worker_id = index, victim_id = victim, "stole task");
    }
    stolen
}

async fn run_task(
    shared: &PoolShared,
    index: usize,
    provider: &dyn ProofProvider,
    bus: &EventBus,
    job: QueuedTask,
) {
    let QueuedTask { mut task, reply } = job;
    let node = task.node.clone();
    let started = Instant::now();

    {
        let mut state = shared.workers[index].lock();
        state.current_task = Some(task.id);
        state.memory_usage = node.estimated_memory;
    }
    let running = shared.running.fetch_add(1, Ordering::SeqCst) + 1;
    shared.peak_running.fetch_max(running, Ordering::SeqCst);
    bus.emit(&Event::TaskStarted {
        task_id: task.id,
        node_id: node.id.clone(),
        worker_id: index,
    });

    task.status = TaskStatus::Running;
    let request = ProofRequest {
        circuit_id: node.circuit_id.clone(),
        system: Some(node.system.clone()),
        provider_id: None,
        public_inputs: node.public_inputs.clone(),
        private_inputs: node.private_inputs.clone(),
        timeout_ms: None,
    };

    let mut result: GenerationResult = provider.generate_proof(&request).await;
    while !result.success && task.retry_count < task.max_retries {
        task.retry_count += 1;
        tracing::debug!(
            node_id = %node.id,
            attempt = task.retry_count,
            "generation failed, retrying"
        );
        result = provider.generate_proof(&request).await;
    }
    task.status = if result.success {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    let elapsed = started.elapsed();
    {
        let mut state = shared.workers[index].lock();
        state.current_task = None;
        state.memory_usage = 0;
        state.tasks_completed += 1;
        state.total_execution_time += elapsed;
    }
    shared.running.fetch_sub(1, Ordering::SeqCst);
    bus.emit(&Event::TaskCompleted {
        task_id: task.id,
        node_id: node.id.clone(),
        success: result.success,
    });

    let _ = reply.send(TaskResult {
        task_id: task.id,
        node_id: node.id,
        worker_id: index,
        attempts: task.retry_count + 1,
        result,
    });

    if shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.drained.notify_waiters();
    }
    // Another queued task may be waiting for a free worker.
    shared.notify.notify_waiters();
}
