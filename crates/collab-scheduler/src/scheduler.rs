//! Scheduler: owns the priority lanes and the worker pool.
//!
//! The `Scheduler` is the local execution engine of a node:
//! - Attaches and launches workers that drain the lanes
//! - Wraps each submitted task in a `TaskFuture`
//! - Awaits completion with a deadline derived from the task's type
//! - Drives tasks through stage pipelines

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use collab_core::{Pipeline, Task};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, SchedulerResult};
use crate::future::{Completion, TaskFuture};
use crate::lanes::{LaneDepth, Lanes};
use crate::registry::HandlerRegistry;
use crate::worker::{WorkerId, WorkerSlot, WorkerState};

/// Default wait deadline for a short task.
pub const DEFAULT_TASK_EXPIRE: Duration = Duration::from_secs(5);

/// Priority scheduler with a pool of worker threads.
pub struct Scheduler {
    lanes: Arc<Lanes>,
    registry: Arc<HandlerRegistry>,
    workers: Mutex<BTreeMap<WorkerId, WorkerSlot>>,
    next_id: AtomicU64,
    /// Base deadline for `done`, scaled per task type.
    task_expire: Duration,
}

impl Scheduler {
    /// Create a scheduler executing handlers from `registry`.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            lanes: Arc::new(Lanes::default()),
            registry,
            workers: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            task_expire: DEFAULT_TASK_EXPIRE,
        }
    }

    /// Set the base task expiry window.
    pub fn with_task_expire(mut self, expire: Duration) -> Self {
        self.task_expire = expire;
        self
    }

    pub fn task_expire(&self) -> Duration {
        self.task_expire
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    fn workers(&self) -> MutexGuard<'_, BTreeMap<WorkerId, WorkerSlot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Worker pool ────────────────────────────────────────────────

    /// Attach a new idle worker to the lanes.
    pub fn attach(&self) -> WorkerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.workers().insert(id, WorkerSlot::new());
        debug!(worker = id, "worker attached");
        id
    }

    /// Attach `n` workers.
    pub fn batch_attach(&self, n: usize) -> Vec<WorkerId> {
        (0..n).map(|_| self.attach()).collect()
    }

    /// Start the loop of an attached worker. Launching a running worker
    /// is a no-op.
    pub fn launch(&self, id: WorkerId) -> SchedulerResult<()> {
        let mut workers = self.workers();
        let slot = workers
            .get_mut(&id)
            .filter(|s| s.is_alive())
            .ok_or(SchedulerError::WorkerNotFound(id))?;

        if slot.state == WorkerState::Running {
            debug!(worker = id, "worker already running");
            return Ok(());
        }

        slot.launch(id, Arc::clone(&self.lanes), Arc::clone(&self.registry))
            .map_err(|e| {
                warn!(worker = id, error = %e, "failed to spawn worker thread");
                SchedulerError::WorkerNotFound(id)
            })
    }

    /// Launch every idle worker. Returns how many were started.
    pub fn launch_all(&self) -> SchedulerResult<usize> {
        let idle: Vec<WorkerId> = self
            .workers()
            .iter()
            .filter(|(_, s)| s.state == WorkerState::Idle)
            .map(|(id, _)| *id)
            .collect();

        for id in &idle {
            self.launch(*id)?;
        }
        info!(launched = idle.len(), "workers launched");
        Ok(idle.len())
    }

    /// Deliver the quit signal to a worker.
    pub fn quit(&self, id: WorkerId) -> SchedulerResult<()> {
        {
            let mut workers = self.workers();
            let slot = workers
                .get_mut(&id)
                .filter(|s| s.is_alive())
                .ok_or(SchedulerError::WorkerNotFound(id))?;
            slot.signal_quit();
        }
        self.lanes.wake_all();
        info!(worker = id, "worker quit signalled");
        Ok(())
    }

    pub fn worker_state(&self, id: WorkerId) -> Option<WorkerState> {
        self.workers().get(&id).map(|s| s.state)
    }

    /// Number of attached workers that have not quit.
    pub fn count_workers(&self) -> usize {
        self.workers().values().filter(|s| s.is_alive()).count()
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Queue one task on its priority lane.
    pub fn enqueue_one(&self, task: Task) -> SchedulerResult<TaskFuture> {
        let (future, ticket) = TaskFuture::new(task);
        self.lanes
            .push(ticket)
            .map_err(|_| SchedulerError::Closed)?;
        Ok(future)
    }

    /// Queue a batch, returning futures keyed by the caller's indices.
    pub fn enqueue(
        &self,
        tasks: BTreeMap<usize, Task>,
    ) -> SchedulerResult<BTreeMap<usize, TaskFuture>> {
        let mut futures = BTreeMap::new();
        for (idx, task) in tasks {
            match self.enqueue_one(task) {
                Ok(f) => {
                    futures.insert(idx, f);
                }
                Err(e) => {
                    for f in futures.values_mut() {
                        f.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(futures)
    }

    /// Enqueue a task and wait for it within its expiry window.
    ///
    /// The future is closed before returning on every path.
    pub async fn done(&self, task: Task) -> SchedulerResult<Completion> {
        let deadline = task.expiry(self.task_expire);
        let mut future = self.enqueue_one(task)?;
        let result = future.wait(deadline).await;
        release(&mut future);
        if matches!(result, Err(SchedulerError::Timeout)) {
            warn!(?deadline, "task timed out");
        }
        result
    }

    /// Enqueue a batch and wait for every task, reporting each outcome.
    ///
    /// Each task is bounded by its own expiry measured from submission,
    /// and every future is closed before returning.
    pub async fn done_each(
        &self,
        tasks: BTreeMap<usize, Task>,
    ) -> SchedulerResult<BTreeMap<usize, SchedulerResult<Completion>>> {
        let start = Instant::now();
        let deadlines: BTreeMap<usize, Duration> = tasks
            .iter()
            .map(|(idx, t)| (*idx, t.expiry(self.task_expire)))
            .collect();

        let mut futures = self.enqueue(tasks)?;
        let mut outcomes = BTreeMap::new();
        for (idx, future) in futures.iter_mut() {
            let remaining = (start + deadlines[idx]).saturating_duration_since(Instant::now());
            outcomes.insert(*idx, future.wait(remaining).await);
            release(future);
        }
        Ok(outcomes)
    }

    /// Enqueue a batch and wait for every task.
    ///
    /// Fails with the first error (usually `Timeout`) if any task does
    /// not complete in time.
    pub async fn done_multi(
        &self,
        tasks: BTreeMap<usize, Task>,
    ) -> SchedulerResult<BTreeMap<usize, Completion>> {
        let outcomes = self.done_each(tasks).await?;
        let total = outcomes.len();
        let mut completed = BTreeMap::new();
        for (idx, outcome) in outcomes {
            match outcome {
                Ok(c) => {
                    completed.insert(idx, c);
                }
                Err(e) => {
                    warn!(error = %e, index = idx, total, "batch did not complete");
                    return Err(e);
                }
            }
        }
        Ok(completed)
    }

    /// Run `task` through every stage of `pipeline`, starting at its
    /// current stage. Stops at the first failing stage.
    pub async fn run_pipeline(&self, mut task: Task, pipeline: &Pipeline) -> SchedulerResult<Completion> {
        let start = task.stage;
        if !pipeline.enter(&mut task, start) {
            return Ok(Completion { task, ok: false });
        }

        loop {
            let completion = self.done(task).await?;
            if !completion.ok {
                debug!(stage = completion.task.stage, "pipeline stage failed");
                return Ok(completion);
            }
            task = completion.task;
            if !pipeline.advance(&mut task) {
                return Ok(Completion { task, ok: true });
            }
        }
    }

    // ── Introspection & shutdown ───────────────────────────────────

    /// Current queue depth per lane.
    pub fn count_tasks(&self) -> LaneDepth {
        self.lanes.depth()
    }

    /// Close all lanes. Queued tasks are abandoned and their futures
    /// resolve as `Closed`; workers exit once idle.
    pub fn close(&self) {
        let dropped = self.lanes.close();
        info!(dropped, "scheduler closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lanes.is_closed()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for slot in self.workers().values_mut() {
            if slot.is_alive() {
                slot.signal_quit();
            }
        }
        self.lanes.close();
    }
}

/// Close a future, surfacing a dirty channel in the log. A result that
/// landed after the waiter timed out is only noted at debug.
fn release(future: &mut TaskFuture) {
    future.close();
    match future.error() {
        Some(_) if future.timed_out() => debug!("task result arrived after its deadline"),
        Some(e) => warn!(error = %e, "future released with unread result"),
        None => {}
    }
}
