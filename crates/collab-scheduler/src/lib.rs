//! collab-scheduler: local priority execution for Collab nodes.
//!
//! Tasks are queued on one of five priority lanes and executed by a pool
//! of worker threads. Callers get a `TaskFuture` per task and await it
//! with a deadline derived from the task's type.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Lanes (Urgent > High > Medium > Low > Base, one mutex + condvar)
//!   ├── Workers (OS threads, highest non-empty lane first, quit flag each)
//!   ├── HandlerRegistry (consumable name → handler)
//!   └── TaskFuture (oneshot completion, dirty-close detection)
//! ```

pub mod error;
pub mod future;
pub mod lanes;
pub mod registry;
pub mod scheduler;
pub mod worker;

pub use error::{SchedulerError, SchedulerResult};
pub use future::{Completion, TaskFuture};
pub use lanes::LaneDepth;
pub use registry::{Handler, HandlerRegistry};
pub use scheduler::{DEFAULT_TASK_EXPIRE, Scheduler};
pub use worker::{WorkerId, WorkerState};
