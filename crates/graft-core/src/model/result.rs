use crate::model::{ErrorCategory, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Captured output of one process run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// What the spawner observed for a single process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    pub output: CapturedOutput,
}

impl ProcessOutput {
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// One attempt (or one skip decision) for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub outcome: Outcome,
    pub attempt: u32,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub output: CapturedOutput,
    pub category: Option<ErrorCategory>,
    pub error: Option<String>,
    pub used_fallback: bool,
    pub started_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// A result for a task that never reached the spawner.
    pub fn not_run(task_id: &str, outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.to_string(),
            outcome,
            attempt: 0,
            exit_code: None,
            duration: Duration::ZERO,
            output: CapturedOutput::default(),
            category: None,
            error: Some(reason.into()),
            used_fallback: false,
            started_at: Utc::now(),
        }
    }
}
