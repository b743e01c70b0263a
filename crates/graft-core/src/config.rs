use crate::breaker::{BreakerConfig, CircuitBreakerRegistry};
use crate::classify::ClassifyRules;
use crate::errors::ConfigError;
use crate::model::RecoveryPolicy;
use crate::spawner::DEFAULT_MAX_OUTPUT_BYTES;
use crate::timeout::TimeoutPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_concurrency: usize,
    pub abort_on_permanent_failure: bool,
    /// Per stream.
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            abort_on_permanent_failure: false,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    #[serde(flatten)]
    pub defaults: BreakerConfig,
    /// Per-agent overrides keyed by agent identity.
    pub agents: BTreeMap<String, BreakerConfig>,
}

/// Engine-wide defaults; every field may be omitted from the TOML source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub timeout: TimeoutPolicy,
    pub retry: RecoveryPolicy,
    pub breaker: BreakerSection,
    pub classify: ClassifyRules,
}

impl EngineConfig {
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "execution.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.timeout.default_seconds == 0 {
            return Err(ConfigError::Invalid(
                "timeout.default_seconds must be at least 1".to_string(),
            ));
        }

        let backoff = &self.retry.backoff;
        check_factor("retry.multiplier", backoff.multiplier)?;
        check_factor("retry.exhaustion_multiplier", self.retry.exhaustion_multiplier)?;
        if !backoff.jitter_percent.is_finite() || !(0.0..=1.0).contains(&backoff.jitter_percent) {
            return Err(ConfigError::Invalid(format!(
                "retry.jitter_percent must be within [0, 1], got {}",
                backoff.jitter_percent
            )));
        }

        if self.breaker.defaults.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        for (agent, config) in &self.breaker.agents {
            if config.failure_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "breaker.agents.{agent}.failure_threshold must be at least 1"
                )));
            }
        }

        Ok(())
    }

    /// Registry seeded with the configured defaults and per-agent overrides.
    pub fn breaker_registry(&self) -> CircuitBreakerRegistry {
        self.breaker.agents.iter().fold(
            CircuitBreakerRegistry::new(self.breaker.defaults),
            |registry, (agent, config)| registry.with_override(agent.clone(), *config),
        )
    }
}

fn check_factor(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a finite number >= 1, got {value}"
        )))
    }
}

/// Reads and validates a TOML config file.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    EngineConfig::from_toml_str(&raw, &path.display().to_string())
}
