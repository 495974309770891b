//! Handler registry: maps a task's `consumable` name to executable code.
//!
//! The registry is an explicit object shared by handle between the
//! scheduler's workers and whoever registers handlers. Lookups happen
//! at execution time, so handlers may be registered after workers launch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use collab_core::{Task, Value};
use tracing::{info, warn};

use crate::error::{SchedulerError, SchedulerResult};

/// A task handler: `(source, result, context) -> success`.
pub type Handler =
    Arc<dyn Fn(&[Value], &mut Vec<Value>, &mut HashMap<String, Value>) -> bool + Send + Sync>;

/// Registry of named task handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handler` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: &str, handler: F)
    where
        F: Fn(&[Value], &mut Vec<Value>, &mut HashMap<String, Value>) -> bool
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::new(handler));
        info!(handler = name, "registered task handler");
    }

    /// Remove a handler. Returns true if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered handler names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn lookup(&self, name: &str) -> SchedulerResult<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| SchedulerError::HandlerNotFound(name.to_string()))
    }

    /// Run the handler for `task`, writing into `task.result`.
    ///
    /// A panicking handler counts as a failed task.
    pub fn execute(&self, task: &mut Task) -> SchedulerResult<bool> {
        let handler = self.lookup(&task.consumable)?;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            handler(&task.source, &mut task.result, &mut task.context)
        }));

        match outcome {
            Ok(ok) => Ok(ok),
            Err(_) => {
                warn!(consumable = %task.consumable, "task handler panicked");
                Ok(false)
            }
        }
    }
}
