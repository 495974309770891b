//! Task: the atomic unit of work routed through the fabric.
//!
//! A task names a registered handler (`consumable`), carries opaque
//! input values (`source`) and receives opaque output values (`result`).
//! Payloads are `serde_json::Value` so any JSON-representable data can
//! cross the wire unchanged.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque payload value carried in `source`, `result`, and `context`.
pub type Value = serde_json::Value;

/// Task lifetime class. Drives the default wait deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum TaskType {
    #[default]
    Short,
    Long,
    Routine,
    Permanent,
}

impl TaskType {
    /// Scale the base expiry window for this task class.
    pub fn expiry(self, base: Duration) -> Duration {
        match self {
            TaskType::Short => base,
            TaskType::Routine => base * 3,
            TaskType::Long => base * 10,
            TaskType::Permanent => base * 60,
        }
    }
}

impl From<u8> for TaskType {
    fn from(v: u8) -> Self {
        match v {
            1 => TaskType::Long,
            2 => TaskType::Routine,
            3 => TaskType::Permanent,
            _ => TaskType::Short,
        }
    }
}

impl From<TaskType> for u8 {
    fn from(t: TaskType) -> Self {
        match t {
            TaskType::Short => 0,
            TaskType::Long => 1,
            TaskType::Routine => 2,
            TaskType::Permanent => 3,
        }
    }
}

/// Scheduling priority. Higher variants are always dequeued first.
///
/// Encoded on the wire as an integer level; unrecognized levels decode
/// as `Base`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(from = "u8", into = "u8")]
pub enum Priority {
    #[default]
    Base,
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    /// Number of priority lanes.
    pub const COUNT: usize = 5;

    /// All priorities, highest first.
    pub const DESCENDING: [Priority; Self::COUNT] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Base,
    ];

    /// Lane index: `Urgent` is lane 0, `Base` is lane 4.
    pub fn lane(self) -> usize {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::Base => 4,
        }
    }
}

impl From<u8> for Priority {
    fn from(v: u8) -> Self {
        match v {
            1 => Priority::Low,
            2 => Priority::Medium,
            3 => Priority::High,
            4 => Priority::Urgent,
            _ => Priority::Base,
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        match p {
            Priority::Base => 0,
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
            Priority::Urgent => 4,
        }
    }
}

/// A serializable unit of work.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type", default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub priority: Priority,
    /// Name of the registered handler that executes this task.
    #[serde(default)]
    pub consumable: String,
    #[serde(default)]
    pub source: Vec<Value>,
    #[serde(default)]
    pub result: Vec<Value>,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    /// Position in a stage pipeline.
    #[serde(default)]
    pub stage: usize,
}

impl Task {
    /// Create a short, base-priority task for the named handler.
    pub fn new(consumable: impl Into<String>) -> Self {
        Self {
            consumable: consumable.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn with_source(mut self, source: Vec<Value>) -> Self {
        self.source = source;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Deadline for waiting on this task given the base expiry window.
    pub fn expiry(&self, base: Duration) -> Duration {
        self.task_type.expiry(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_lanes_are_ordered_highest_first() {
        let lanes: Vec<usize> = Priority::DESCENDING.iter().map(|p| p.lane()).collect();
        assert_eq!(lanes, vec![0, 1, 2, 3, 4]);
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Low > Priority::Base);
    }

    #[test]
    fn unknown_priority_level_decodes_as_base() {
        let task: Task =
            serde_json::from_value(json!({"priority": 42, "consumable": "echo"})).unwrap();
        assert_eq!(task.priority, Priority::Base);
        assert_eq!(task.task_type, TaskType::Short);
    }

    #[test]
    fn task_wire_format_keeps_opaque_payloads() {
        let task = Task::new("echo")
            .with_priority(Priority::High)
            .with_source(vec![json!({"nested": [1, 2]}), json!("text"), json!(null)])
            .with_context("trace", json!("abc"));

        let wire = serde_json::to_value(&task).unwrap();
        assert_eq!(wire["priority"], json!(3));
        assert_eq!(wire["type"], json!(0));

        let back: Task = serde_json::from_value(wire).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn expiry_scales_with_task_type() {
        let base = Duration::from_secs(2);
        assert_eq!(Task::new("x").expiry(base), base);
        assert_eq!(
            Task::new("x").with_type(TaskType::Long).expiry(base),
            Duration::from_secs(20)
        );
        assert_eq!(TaskType::Routine.expiry(base), Duration::from_secs(6));
        assert_eq!(TaskType::Permanent.expiry(base), Duration::from_secs(120));
    }
}
