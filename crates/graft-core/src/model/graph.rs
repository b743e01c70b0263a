use crate::model::Task;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A validated, layered task graph ready to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub run_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub tasks: HashMap<String, Task>,
    pub levels: Vec<Vec<String>>,
}

impl TaskGraph {
    pub fn total_levels(&self) -> u32 {
        self.levels.len() as u32
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
