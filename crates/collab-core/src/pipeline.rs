//! Stage pipelines.
//!
//! A pipeline is an ordered arena of stages. A task's `stage` field is
//! its index into the arena; moving forward or back is index arithmetic.

use serde::{Deserialize, Serialize};

use crate::task::{Priority, Task, TaskType};

/// One step of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    /// Handler that executes this stage.
    pub consumable: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, rename = "type")]
    pub task_type: TaskType,
}

impl Stage {
    pub fn new(name: impl Into<String>, consumable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            consumable: consumable.into(),
            priority: Priority::default(),
            task_type: TaskType::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// An ordered sequence of stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    pub fn then(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    pub fn next(&self, index: usize) -> Option<usize> {
        let next = index.checked_add(1)?;
        (next < self.stages.len()).then_some(next)
    }

    pub fn prev(&self, index: usize) -> Option<usize> {
        index.checked_sub(1).filter(|i| *i < self.stages.len())
    }

    /// Configure `task` to run stage `index`. Returns false if out of range.
    pub fn enter(&self, task: &mut Task, index: usize) -> bool {
        let Some(stage) = self.stages.get(index) else {
            return false;
        };
        task.stage = index;
        task.consumable = stage.consumable.clone();
        task.priority = stage.priority;
        task.task_type = stage.task_type;
        true
    }

    /// Move `task` to its next stage, feeding the current result in as
    /// the next source. Returns false when the task is on the last stage.
    pub fn advance(&self, task: &mut Task) -> bool {
        match self.next(task.stage) {
            Some(next) => {
                task.source = std::mem::take(&mut task.result);
                self.enter(task, next)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_stage() -> Pipeline {
        Pipeline::new()
            .then(Stage::new("parse", "parse"))
            .then(Stage::new("enrich", "enrich").with_priority(Priority::High))
            .then(Stage::new("store", "store"))
    }

    #[test]
    fn next_and_prev_are_bounded() {
        let p = three_stage();
        assert_eq!(p.next(0), Some(1));
        assert_eq!(p.next(2), None);
        assert_eq!(p.prev(0), None);
        assert_eq!(p.prev(2), Some(1));
        assert_eq!(p.prev(7), None);
    }

    #[test]
    fn advance_moves_result_into_source() {
        let p = three_stage();
        let mut task = Task::new("");
        assert!(p.enter(&mut task, 0));
        assert_eq!(task.consumable, "parse");

        task.result = vec![json!("parsed")];
        assert!(p.advance(&mut task));
        assert_eq!(task.stage, 1);
        assert_eq!(task.consumable, "enrich");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.source, vec![json!("parsed")]);
        assert!(task.result.is_empty());

        assert!(p.advance(&mut task));
        assert!(!p.advance(&mut task));
        assert_eq!(task.stage, 2);
    }

    #[test]
    fn empty_pipeline_rejects_enter() {
        let p = Pipeline::new();
        let mut task = Task::new("x");
        assert!(!p.enter(&mut task, 0));
        assert!(p.is_empty());
    }
}
