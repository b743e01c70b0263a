use crate::model::{ErrorCategory, ExecutionResult, RunStatus, TaskGraph, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SummaryCounts {
    /// Succeeded on the first attempt.
    pub succeeded: usize,
    pub retried_then_succeeded: usize,
    pub fell_back: usize,
    pub permanently_failed: usize,
    pub skipped: usize,
    pub circuit_open: usize,
    pub cancelled: usize,
}

impl SummaryCounts {
    pub fn total(&self) -> usize {
        self.succeeded
            + self.retried_then_succeeded
            + self.fell_back
            + self.permanently_failed
            + self.skipped
            + self.circuit_open
            + self.cancelled
    }

    pub fn total_succeeded(&self) -> usize {
        self.succeeded + self.retried_then_succeeded + self.fell_back
    }
}

/// Terminal report for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub task_id: String,
    pub agent: String,
    pub level: u32,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_category: Option<ErrorCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub run_id: String,
    pub graph_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_levels: u32,
    pub counts: SummaryCounts,
    pub tasks: Vec<TaskReport>,
    pub results: Vec<ExecutionResult>,
}

impl RecoverySummary {
    pub fn new(graph: &TaskGraph) -> Self {
        Self {
            run_id: graph.run_id.clone(),
            graph_name: graph.name.clone(),
            status: RunStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            total_levels: graph.total_levels(),
            counts: SummaryCounts::default(),
            tasks: Vec::with_capacity(graph.len()),
            results: Vec::new(),
        }
    }

    pub fn record_result(&mut self, result: ExecutionResult) {
        self.results.push(result);
    }

    pub fn record_task(&mut self, report: TaskReport) {
        match report.state {
            TaskState::Succeeded if report.attempts > 1 => self.counts.retried_then_succeeded += 1,
            TaskState::Succeeded => self.counts.succeeded += 1,
            TaskState::FellBack => self.counts.fell_back += 1,
            TaskState::PermanentlyFailed => self.counts.permanently_failed += 1,
            TaskState::Skipped => self.counts.skipped += 1,
            TaskState::CircuitOpen => self.counts.circuit_open += 1,
            TaskState::Cancelled => self.counts.cancelled += 1,
            TaskState::Pending | TaskState::Running | TaskState::FailedRetryPending => {}
        }
        self.tasks.push(report);
    }

    /// Seals the summary; task reports are ordered by level, then id.
    pub fn finalize(&mut self, status: RunStatus) {
        self.tasks.sort_by(|left, right| {
            (left.level, left.task_id.as_str()).cmp(&(right.level, right.task_id.as_str()))
        });
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|report| report.task_id == task_id)
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.task(task_id).map(|report| report.state)
    }

    pub fn results_for<'a>(
        &'a self,
        task_id: &'a str,
    ) -> impl Iterator<Item = &'a ExecutionResult> + 'a {
        self.results
            .iter()
            .filter(move |result| result.task_id == task_id)
    }
}
