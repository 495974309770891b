//! Task futures: single-use completion handles.
//!
//! Enqueueing a task splits it into a [`Ticket`] (the task plus the
//! sending half, travelling through the lanes to a worker) and a
//! [`TaskFuture`] (the receiving half, kept by the caller). The sending
//! half is consumed on fulfilment, so a ticket can never be answered
//! twice.

use std::time::Duration;

use collab_core::Task;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};

/// A finished task and its handler's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub task: Task,
    pub ok: bool,
}

/// Worker-side half of a submitted task.
pub(crate) struct Ticket {
    pub(crate) task: Task,
    reply: oneshot::Sender<Completion>,
}

impl Ticket {
    /// Run `f` on the task and hand the result back to its waiter.
    pub(crate) fn complete_with(self, f: impl FnOnce(&mut Task) -> bool) -> bool {
        let Ticket { mut task, reply } = self;
        let ok = f(&mut task);
        if reply.send(Completion { task, ok }).is_err() {
            debug!("task waiter went away before completion");
        }
        ok
    }
}

/// Caller-side completion handle for one submitted task.
#[derive(Debug)]
pub struct TaskFuture {
    rx: Option<oneshot::Receiver<Completion>>,
    err: Option<SchedulerError>,
    timed_out: bool,
}

impl TaskFuture {
    pub(crate) fn new(task: Task) -> (Self, Ticket) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                rx: Some(rx),
                err: None,
                timed_out: false,
            },
            Ticket { task, reply },
        )
    }

    /// Wait up to `timeout` for the task to complete.
    ///
    /// A successful wait consumes the result; the future must still be
    /// closed afterwards.
    pub async fn wait(&mut self, timeout: Duration) -> SchedulerResult<Completion> {
        let rx = self.rx.as_mut().ok_or(SchedulerError::Closed)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(completion)) => {
                self.rx = None;
                Ok(completion)
            }
            Ok(Err(_)) => {
                self.rx = None;
                Err(SchedulerError::Closed)
            }
            Err(_) => {
                self.timed_out = true;
                Err(SchedulerError::Timeout)
            }
        }
    }

    /// Release the future.
    ///
    /// If a result was delivered but never read, the future is flagged
    /// with [`SchedulerError::ChannelDirty`].
    pub fn close(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.err = Some(SchedulerError::ChannelDirty);
            }
        }
    }

    /// Whether a wait on this future ran out of time. A result found at
    /// close after a timeout is a late arrival, not a second fulfilment.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_none()
    }

    /// Error recorded at close, if any.
    pub fn error(&self) -> Option<&SchedulerError> {
        self.err.as_ref()
    }
}
