pub mod breaker;
pub mod builder;
pub mod classify;
pub mod config;
pub mod errors;
pub mod executor;
pub mod layers;
pub mod model;
pub mod recovery;
pub mod spawner;
pub mod state;
pub mod timeout;

pub use breaker::{
    Admission, BreakerConfig, BreakerSnapshot, CircuitBreakerRegistry, CircuitState,
};
pub use builder::{GraphBuilder, TaskBuilder};
pub use classify::ClassifyRules;
pub use config::{BreakerSection, EngineConfig, ExecutionConfig, load_config};
pub use errors::{ConfigError, ExecutionError, GraphValidationError, SpawnError};
pub use executor::Orchestrator;
pub use model::{
    BackoffPolicy, BackoffShape, CapturedOutput, ErrorCategory, ExecutionResult, Invocation,
    Outcome, ProcessOutput, RecoveryPolicy, RecoverySummary, RunStatus, SummaryCounts, Task,
    TaskGraph, TaskReport, TaskState,
};
pub use recovery::{FailureContext, NextAction, decide};
pub use spawner::{ProcessSpawner, Spawner};
pub use state::{deserialize_summary, serialize_summary};
pub use timeout::{Deadline, TerminationMode, TimeoutPolicy};
