use crate::model::{ErrorCategory, Invocation, RecoveryPolicy, calculate_backoff_with_rng};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    Retry { delay: Duration },
    Fallback { invocation: Invocation },
    GiveUp,
}

/// Facts about the failed attempt that the decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub category: ErrorCategory,
    pub fallback: Option<&'a Invocation>,
    pub fallback_used: bool,
    pub previous_delay: Option<Duration>,
}

pub fn decide<R: Rng + ?Sized>(
    policy: &RecoveryPolicy,
    context: &FailureContext<'_>,
    rng: &mut R,
) -> NextAction {
    // The fallback result is final whatever it was.
    if context.fallback_used {
        return NextAction::GiveUp;
    }

    if policy.retries(context.category) && context.attempt < policy.max_attempts {
        let mut delay = calculate_backoff_with_rng(context.attempt, &policy.backoff, rng);
        if context.category == ErrorCategory::ResourceExhaustion {
            delay = delay.mul_f64(policy.exhaustion_multiplier.max(1.0));
        }
        // The cap bounds the final delay, after jitter and the exhaustion multiplier.
        delay = delay.min(Duration::from_millis(policy.backoff.max_interval_ms));
        if let Some(previous) = context.previous_delay {
            delay = delay.max(previous);
        }
        return NextAction::Retry { delay };
    }

    match context.fallback {
        Some(invocation) => NextAction::Fallback {
            invocation: invocation.clone(),
        },
        None => NextAction::GiveUp,
    }
}

/// Jitter source for one task; reproducible when the policy carries a seed.
pub fn task_rng(seed: Option<u64>, task_id: &str) -> StdRng {
    match seed {
        Some(seed) => {
            // FNV-1a over the id keeps sibling tasks on distinct but stable streams.
            let mixed = task_id.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
                (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
            });
            StdRng::seed_from_u64(seed ^ mixed)
        }
        None => StdRng::from_entropy(),
    }
}
