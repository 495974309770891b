//! Scheduler error types.

use thiserror::Error;

use crate::worker::WorkerId;

/// Errors that can occur while scheduling or awaiting tasks.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task did not complete before its deadline")]
    Timeout,

    #[error("worker not found or not alive: {0}")]
    WorkerNotFound(WorkerId),

    #[error("scheduler is closed")]
    Closed,

    #[error("future channel held an unread result at close")]
    ChannelDirty,

    #[error("no handler registered for consumable: {0}")]
    HandlerNotFound(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
