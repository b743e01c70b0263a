use graft_core::{
    BreakerSnapshot, CircuitState, ErrorCategory, RecoverySummary, RunStatus, TaskGraph, TaskState,
};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryView {
    pub run_id: String,
    pub status: RunStatus,
    pub elapsed_ms: Option<i64>,
    pub levels: Vec<LevelSummary>,
    pub tasks: Vec<TaskLine>,
    pub breakers: Vec<BreakerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskLine {
    pub task_id: String,
    pub agent: String,
    pub level: u32,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_category: Option<ErrorCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LevelSummary {
    pub level: u32,
    pub total_tasks: usize,
    pub succeeded: usize,
    pub fell_back: usize,
    pub failed: usize,
    pub skipped: usize,
    pub circuit_open: usize,
    pub cancelled: usize,
}

impl SummaryView {
    pub fn new(summary: &RecoverySummary, breakers: Vec<BreakerSnapshot>) -> Self {
        let tasks = summary
            .tasks
            .iter()
            .map(|report| TaskLine {
                task_id: report.task_id.clone(),
                agent: report.agent.clone(),
                level: report.level,
                state: report.state,
                attempts: report.attempts,
                last_error: report.last_error.clone(),
                last_category: report.last_category,
            })
            .collect::<Vec<_>>();

        let mut levels = (0..summary.total_levels)
            .map(|level| LevelSummary {
                level,
                ..LevelSummary::default()
            })
            .collect::<Vec<_>>();
        for task in &tasks {
            if let Some(level) = levels.get_mut(task.level as usize) {
                level.total_tasks += 1;
                match task.state {
                    TaskState::Succeeded => level.succeeded += 1,
                    TaskState::FellBack => level.fell_back += 1,
                    TaskState::PermanentlyFailed => level.failed += 1,
                    TaskState::Skipped => level.skipped += 1,
                    TaskState::CircuitOpen => level.circuit_open += 1,
                    TaskState::Cancelled => level.cancelled += 1,
                    TaskState::Pending | TaskState::Running | TaskState::FailedRetryPending => {}
                }
            }
        }

        Self {
            run_id: summary.run_id.clone(),
            status: summary.status,
            elapsed_ms: summary
                .completed_at
                .map(|completed| (completed - summary.started_at).num_milliseconds()),
            levels,
            tasks,
            breakers,
        }
    }
}

impl Display for SummaryView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.elapsed_ms {
            Some(elapsed) => writeln!(
                f,
                "Run {}: {} in {} ms",
                self.run_id,
                render_run_status(self.status),
                elapsed
            )?,
            None => writeln!(f, "Run {}: {}", self.run_id, render_run_status(self.status))?,
        }

        for summary in &self.levels {
            let parts = [
                (summary.succeeded, "succeeded"),
                (summary.fell_back, "fell back"),
                (summary.failed, "failed"),
                (summary.skipped, "skipped"),
                (summary.circuit_open, "circuit open"),
                (summary.cancelled, "cancelled"),
            ]
            .into_iter()
            .filter(|(count, _)| *count > 0)
            .map(|(count, label)| format!("{count}/{} {label}", summary.total_tasks))
            .collect::<Vec<_>>();
            let status_line = if parts.is_empty() {
                format!("0/{} tasks", summary.total_tasks)
            } else {
                parts.join(", ")
            };
            writeln!(f, "  Level {}: {}", summary.level, status_line)?;
        }

        writeln!(f)?;
        writeln!(f, "Tasks:")?;
        for task in &self.tasks {
            writeln!(
                f,
                "  {:<12} [L{}] {:<18} agent={} attempts={}",
                task.task_id,
                task.level,
                render_task_state(task.state),
                task.agent,
                task.attempts
            )?;
            if let Some(last_error) = &task.last_error {
                match task.last_category {
                    Some(category) => writeln!(f, "    error ({category}): {last_error}")?,
                    None => writeln!(f, "    note: {last_error}")?,
                }
            }
        }

        if !self.breakers.is_empty() {
            writeln!(f)?;
            writeln!(f, "Breakers:")?;
            for breaker in &self.breakers {
                writeln!(
                    f,
                    "  {:<12} {} ({} consecutive failures)",
                    breaker.agent,
                    render_circuit_state(breaker.state),
                    breaker.consecutive_failures
                )?;
            }
        }

        Ok(())
    }
}

/// Execution plan printed by `graft validate`.
pub struct LevelsView<'a>(pub &'a TaskGraph);

impl Display for LevelsView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let graph = self.0;
        writeln!(
            f,
            "Graph {}: {} tasks in {} levels",
            graph.name,
            graph.len(),
            graph.total_levels()
        )?;
        for (level, task_ids) in graph.levels.iter().enumerate() {
            writeln!(f, "  Level {level}: {}", task_ids.join(", "))?;
        }
        Ok(())
    }
}

fn render_run_status(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Aborted => "aborted",
        RunStatus::Cancelled => "cancelled",
    }
}

fn render_task_state(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "pending",
        TaskState::Running => "running",
        TaskState::FailedRetryPending => "retry pending",
        TaskState::Succeeded => "succeeded",
        TaskState::FellBack => "fell back",
        TaskState::PermanentlyFailed => "permanently failed",
        TaskState::Skipped => "skipped",
        TaskState::CircuitOpen => "circuit open",
        TaskState::Cancelled => "cancelled",
    }
}

fn render_circuit_state(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half-open",
    }
}
