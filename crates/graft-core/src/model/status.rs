use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Cancelled
        )
    }
}

/// Outcome of a single attempt, as recorded in an execution result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    TimedOut,
    Skipped,
    CircuitOpen,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Per-task state machine driven by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    FailedRetryPending,
    Succeeded,
    FellBack,
    PermanentlyFailed,
    Skipped,
    CircuitOpen,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running | Self::FailedRetryPending)
    }

    /// Terminal states that let dependents run.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded | Self::FellBack)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    Timeout,
    Permanent,
    ResourceExhaustion,
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Permanent => "permanent",
            Self::ResourceExhaustion => "resource_exhaustion",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminal_states() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Aborted.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn task_state_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::FailedRetryPending.is_terminal());
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::FellBack.is_terminal());
        assert!(TaskState::PermanentlyFailed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(TaskState::CircuitOpen.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn only_success_states_unblock_dependents() {
        assert!(TaskState::Succeeded.is_success());
        assert!(TaskState::FellBack.is_success());
        assert!(!TaskState::PermanentlyFailed.is_success());
        assert!(!TaskState::CircuitOpen.is_success());
        assert!(!TaskState::Skipped.is_success());
        assert!(!TaskState::Cancelled.is_success());
    }

    #[test]
    fn category_serializes_snake_case() {
        let encoded = serde_json::to_string(&ErrorCategory::ResourceExhaustion).expect("encode");
        assert_eq!(encoded, "\"resource_exhaustion\"");
        assert_eq!(ErrorCategory::ResourceExhaustion.to_string(), "resource_exhaustion");
    }
}
