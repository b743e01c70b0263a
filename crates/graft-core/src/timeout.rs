use crate::model::Task;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationMode {
    /// Kill the process group the moment the deadline passes.
    #[default]
    Hard,
    /// SIGTERM first, force-kill once the grace interval runs out.
    Graceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    pub default_seconds: u64,
    pub mode: TerminationMode,
    pub grace_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default_seconds: 300,
            mode: TerminationMode::Hard,
            grace_ms: 5_000,
        }
    }
}

/// Time budget for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub limit: Duration,
    pub mode: TerminationMode,
    pub grace: Duration,
}

impl Deadline {
    pub fn hard(limit: Duration) -> Self {
        Self {
            limit,
            mode: TerminationMode::Hard,
            grace: Duration::ZERO,
        }
    }

    pub fn graceful(limit: Duration, grace: Duration) -> Self {
        Self {
            limit,
            mode: TerminationMode::Graceful,
            grace,
        }
    }
}

impl TimeoutPolicy {
    pub fn default_limit(&self) -> Duration {
        Duration::from_secs(self.default_seconds)
    }

    /// Fresh deadline for the next attempt of `task`.
    pub fn deadline_for(&self, task: &Task) -> Deadline {
        let limit = task.timeout.unwrap_or_else(|| self.default_limit());
        match self.mode {
            TerminationMode::Hard => Deadline::hard(limit),
            TerminationMode::Graceful => {
                Deadline::graceful(limit, Duration::from_millis(self.grace_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_override_wins_over_default() {
        let policy = TimeoutPolicy::default();
        let plain = Task::default();
        let bounded = Task {
            timeout: Some(Duration::from_secs(2)),
            ..Task::default()
        };

        assert_eq!(policy.deadline_for(&plain).limit, Duration::from_secs(300));
        assert_eq!(policy.deadline_for(&bounded).limit, Duration::from_secs(2));
        assert_eq!(policy.deadline_for(&bounded).mode, TerminationMode::Hard);
    }

    #[test]
    fn graceful_mode_carries_grace_interval() {
        let policy = TimeoutPolicy {
            default_seconds: 10,
            mode: TerminationMode::Graceful,
            grace_ms: 750,
        };
        let deadline = policy.deadline_for(&Task::default());
        assert_eq!(
            deadline,
            Deadline::graceful(Duration::from_secs(10), Duration::from_millis(750))
        );
    }

    #[test]
    fn parses_mode_from_toml() {
        let policy: TimeoutPolicy = toml::from_str("mode = \"graceful\"").expect("parse");
        assert_eq!(policy.mode, TerminationMode::Graceful);
        assert_eq!(policy.default_seconds, 300);
    }
}
