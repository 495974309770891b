//! Workers - OS threads draining the priority lanes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::lanes::Lanes;
use crate::registry::HandlerRegistry;

/// Identifier handed out by `Scheduler::attach`.
pub type WorkerId = u64;

/// Lifecycle of an attached worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Attached to the lanes but not running.
    Idle,
    Running,
    /// Quit signal delivered; the worker can not be relaunched.
    Stopped,
}

pub(crate) struct WorkerSlot {
    pub(crate) state: WorkerState,
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: WorkerState::Idle,
            quit: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.state != WorkerState::Stopped
    }

    /// Spawn the worker thread.
    pub(crate) fn launch(
        &mut self,
        id: WorkerId,
        lanes: Arc<Lanes>,
        registry: Arc<HandlerRegistry>,
    ) -> std::io::Result<()> {
        let quit = Arc::clone(&self.quit);
        let handle = std::thread::Builder::new()
            .name(format!("collab-worker-{id}"))
            .spawn(move || run_worker(id, &lanes, &registry, &quit))?;
        self.handle = Some(handle);
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Raise the quit flag. The thread is detached and exits at its
    /// next loop iteration; an in-flight handler runs to completion.
    pub(crate) fn signal_quit(&mut self) {
        self.quit.store(true, Ordering::Release);
        self.handle.take();
        self.state = WorkerState::Stopped;
    }
}

fn run_worker(id: WorkerId, lanes: &Lanes, registry: &HandlerRegistry, quit: &AtomicBool) {
    info!(worker = id, "worker started");

    while let Some(ticket) = lanes.pop(quit) {
        ticket.complete_with(|task| {
            let ok = match registry.execute(task) {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(worker = id, error = %e, "task failed");
                    false
                }
            };
            debug!(worker = id, consumable = %task.consumable, ok, "task executed");
            ok
        });
    }

    info!(worker = id, "worker stopped");
}
