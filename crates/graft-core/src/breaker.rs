//! Per-agent circuit breaker registry.
//!
//! Each agent identity owns an independently locked entry; the registry map lock is only held
//! long enough to find or create that entry, so unrelated agents never contend on state updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    #[serde(with = "millis", rename = "cooldown_ms")]
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Point-in-time view of one agent's breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub agent: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
    pub trial_in_flight: bool,
}

#[derive(Debug)]
struct BreakerEntry {
    config: BreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_transition: DateTime<Utc>,
    trial_in_flight: bool,
    trials_granted: u64,
}

impl BreakerEntry {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_transition: Utc::now(),
            trial_in_flight: false,
            trials_granted: 0,
        }
    }

    fn grant_trial(&mut self) -> Admission {
        self.trial_in_flight = true;
        self.trials_granted += 1;
        Admission::Trial(self.trials_granted)
    }

    fn transition(&mut self, agent: &str, next: CircuitState) {
        if self.state == next {
            return;
        }
        match next {
            CircuitState::Open => warn!(
                agent,
                from = ?self.state,
                failures = self.consecutive_failures,
                "circuit opened"
            ),
            _ => info!(agent, from = ?self.state, to = ?next, "circuit transition"),
        }
        self.state = next;
        self.last_transition = Utc::now();
    }

    fn trip(&mut self, agent: &str) {
        self.transition(agent, CircuitState::Open);
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
    }

    fn snapshot(&self, agent: &str) -> BreakerSnapshot {
        BreakerSnapshot {
            agent: agent.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_transition: self.last_transition,
            trial_in_flight: self.trial_in_flight,
        }
    }
}

/// Result of asking a breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The circuit is closed.
    Admitted,
    /// The caller holds the single half-open trial identified by this number.
    Trial(u64),
    Rejected,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    entries: Mutex<HashMap<String, Arc<Mutex<BreakerEntry>>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Uses `config` instead of the defaults for `agent`.
    pub fn with_override(mut self, agent: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(agent.into(), config);
        self
    }

    pub fn config_for(&self, agent: &str) -> BreakerConfig {
        self.overrides.get(agent).copied().unwrap_or(self.defaults)
    }

    /// Returns false when calls to `agent` must fail fast.
    pub fn allow(&self, agent: &str) -> bool {
        self.admit(agent).is_admitted()
    }

    pub fn admit(&self, agent: &str) -> Admission {
        let entry = self.entry(agent);
        let mut entry = lock(&entry);
        match entry.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::Open => {
                let cooled_down = entry
                    .opened_at
                    .is_none_or(|opened_at| opened_at.elapsed() >= entry.config.cooldown);
                if cooled_down {
                    entry.transition(agent, CircuitState::HalfOpen);
                    entry.grant_trial()
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen if entry.trial_in_flight => Admission::Rejected,
            CircuitState::HalfOpen => entry.grant_trial(),
        }
    }

    /// A success closes the circuit unless it is open; a late success from a call admitted
    /// before the circuit tripped does not skip the cooldown.
    pub fn record_success(&self, agent: &str) {
        let entry = self.entry(agent);
        let mut entry = lock(&entry);
        if entry.state == CircuitState::Open {
            debug!(agent, "ignoring success while circuit is open");
            return;
        }
        entry.consecutive_failures = 0;
        entry.trial_in_flight = false;
        entry.opened_at = None;
        entry.transition(agent, CircuitState::Closed);
    }

    pub fn record_failure(&self, agent: &str) {
        let entry = self.entry(agent);
        let mut entry = lock(&entry);
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        match entry.state {
            CircuitState::Closed => {
                if entry.consecutive_failures >= entry.config.failure_threshold {
                    entry.trip(agent);
                }
            }
            CircuitState::HalfOpen => entry.trip(agent),
            CircuitState::Open => {}
        }
    }

    /// Gives back a half-open trial that ended without a verdict. Only the holder of the
    /// current trial can release it; any other admission is a no-op.
    pub fn release(&self, agent: &str, admission: Admission) {
        let Admission::Trial(trial) = admission else {
            return;
        };
        let entry = self.entry(agent);
        let mut entry = lock(&entry);
        if entry.state == CircuitState::HalfOpen && entry.trials_granted == trial {
            entry.trial_in_flight = false;
        }
    }

    pub fn snapshot(&self, agent: &str) -> Option<BreakerSnapshot> {
        let entry = lock(&self.entries).get(agent).cloned()?;
        let snapshot = lock(&entry).snapshot(agent);
        Some(snapshot)
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let entries: Vec<(String, Arc<Mutex<BreakerEntry>>)> = lock(&self.entries)
            .iter()
            .map(|(agent, entry)| (agent.clone(), Arc::clone(entry)))
            .collect();
        let mut snapshots: Vec<BreakerSnapshot> = entries
            .iter()
            .map(|(agent, entry)| lock(entry).snapshot(agent))
            .collect();
        snapshots.sort_by(|left, right| left.agent.cmp(&right.agent));
        snapshots
    }

    pub fn reset(&self, agent: &str) {
        if lock(&self.entries).remove(agent).is_some() {
            info!(agent, "circuit reset");
        }
    }

    pub fn reset_all(&self) {
        lock(&self.entries).clear();
    }

    fn entry(&self, agent: &str) -> Arc<Mutex<BreakerEntry>> {
        let mut entries = lock(&self.entries);
        Arc::clone(
            entries
                .entry(agent.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BreakerEntry::new(self.config_for(agent))))),
        )
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
