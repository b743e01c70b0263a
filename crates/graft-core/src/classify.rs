use crate::model::{ErrorCategory, ProcessOutput};
use serde::{Deserialize, Serialize};

/// Rules that decide whether a failed exit is worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifyRules {
    pub retryable_exit_codes: Vec<i32>,
    /// Case-insensitive substrings searched for in stderr.
    pub retryable_markers: Vec<String>,
}

impl Default for ClassifyRules {
    fn default() -> Self {
        Self {
            // EX_TEMPFAIL
            retryable_exit_codes: vec![75],
            retryable_markers: vec![
                "rate limit".to_string(),
                "temporarily unavailable".to_string(),
                "connection reset".to_string(),
                "try again".to_string(),
            ],
        }
    }
}

impl ClassifyRules {
    /// `None` means the process succeeded.
    pub fn classify(&self, output: &ProcessOutput) -> Option<ErrorCategory> {
        if output.timed_out {
            return Some(ErrorCategory::Timeout);
        }

        match output.exit_code {
            Some(0) => None,
            // Terminated by a signal from outside the engine.
            None => Some(ErrorCategory::Transient),
            Some(code) if self.retryable_exit_codes.contains(&code) => {
                Some(ErrorCategory::Transient)
            }
            Some(_) if self.has_retryable_marker(&output.output.stderr) => {
                Some(ErrorCategory::Transient)
            }
            Some(_) => Some(ErrorCategory::Permanent),
        }
    }

    fn has_retryable_marker(&self, stderr: &str) -> bool {
        if self.retryable_markers.is_empty() {
            return false;
        }
        let haystack = stderr.to_lowercase();
        self.retryable_markers
            .iter()
            .any(|marker| !marker.is_empty() && haystack.contains(&marker.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CapturedOutput;
    use std::time::Duration;

    fn output(exit_code: Option<i32>, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            exit_code,
            timed_out: false,
            duration: Duration::from_millis(5),
            output: CapturedOutput {
                stderr: stderr.to_string(),
                ..CapturedOutput::default()
            },
        }
    }

    #[test]
    fn zero_exit_is_success() {
        assert_eq!(ClassifyRules::default().classify(&output(Some(0), "")), None);
    }

    #[test]
    fn timeout_wins_over_exit_code() {
        let mut timed_out = output(None, "");
        timed_out.timed_out = true;
        assert_eq!(
            ClassifyRules::default().classify(&timed_out),
            Some(ErrorCategory::Timeout)
        );
    }

    #[test]
    fn retryable_exit_codes_and_markers_are_transient() {
        let rules = ClassifyRules::default();
        assert_eq!(
            rules.classify(&output(Some(75), "")),
            Some(ErrorCategory::Transient)
        );
        assert_eq!(
            rules.classify(&output(Some(1), "error: Rate Limit exceeded")),
            Some(ErrorCategory::Transient)
        );
        assert_eq!(
            rules.classify(&output(None, "")),
            Some(ErrorCategory::Transient)
        );
    }

    #[test]
    fn other_failures_are_permanent() {
        let rules = ClassifyRules::default();
        assert_eq!(
            rules.classify(&output(Some(2), "usage: agent [options]")),
            Some(ErrorCategory::Permanent)
        );

        let strict = ClassifyRules {
            retryable_exit_codes: Vec::new(),
            retryable_markers: Vec::new(),
        };
        assert_eq!(
            strict.classify(&output(Some(75), "try again")),
            Some(ErrorCategory::Permanent)
        );
    }
}
