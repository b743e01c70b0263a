use crate::model::ErrorCategory;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffShape {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    pub shape: BackoffShape,
    pub initial_interval_ms: u64,
    pub multiplier: f64,
    pub max_interval_ms: u64,
    pub jitter_percent: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            shape: BackoffShape::Exponential,
            initial_interval_ms: 1_000,
            multiplier: 2.0,
            max_interval_ms: 60_000,
            jitter_percent: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    pub max_attempts: u32,
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
    pub retry_on: BTreeSet<ErrorCategory>,
    pub exhaustion_multiplier: f64,
    pub seed: Option<u64>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            retry_on: BTreeSet::from([
                ErrorCategory::Transient,
                ErrorCategory::Timeout,
                ErrorCategory::ResourceExhaustion,
            ]),
            exhaustion_multiplier: 4.0,
            seed: None,
        }
    }
}

impl RecoveryPolicy {
    pub fn retries(&self, category: ErrorCategory) -> bool {
        category != ErrorCategory::Permanent && self.retry_on.contains(&category)
    }
}

/// Delay before the retry that follows `attempt` (1-based), without jitter.
pub fn base_backoff_duration(attempt: u32, policy: &BackoffPolicy) -> Duration {
    let raw = match policy.shape {
        BackoffShape::Fixed => policy.initial_interval_ms as f64,
        BackoffShape::Exponential => {
            let exp = policy.multiplier.powi(attempt.saturating_sub(1) as i32);
            (policy.initial_interval_ms as f64) * exp
        }
    };
    let bounded = raw.min(policy.max_interval_ms as f64).max(0.0);
    Duration::from_millis(bounded.round() as u64)
}

pub fn calculate_backoff_with_rng<R: Rng + ?Sized>(
    attempt: u32,
    policy: &BackoffPolicy,
    rng: &mut R,
) -> Duration {
    let base_ms = base_backoff_duration(attempt, policy).as_millis() as f64;
    let jitter_percent = policy.jitter_percent.clamp(0.0, 1.0);
    let jitter_scalar = if jitter_percent > 0.0 {
        rng.gen_range(-jitter_percent..=jitter_percent)
    } else {
        0.0
    };
    let delay = (base_ms * (1.0 + jitter_scalar)).max(0.0);
    Duration::from_millis(delay.round() as u64)
}
