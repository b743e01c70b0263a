use crate::model::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphValidationError {
    #[error("graph contains a cycle through task: {0}")]
    CycleDetected(String),
    #[error("task has missing dependency: {0}")]
    MissingDependency(String),
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),
    #[error("task is missing agent identity: {0}")]
    MissingAgent(String),
    #[error("task is missing a command: {0}")]
    MissingCommand(String),
    #[error("task {task_id} falls back to unknown task {fallback}")]
    MissingFallback { task_id: String, fallback: String },
    #[error("task cannot fall back to itself: {0}")]
    SelfFallback(String),
    #[error("reserved task id prefix '_': {0}")]
    ReservedTaskId(String),
    #[error("invalid task id: {0}")]
    InvalidTaskId(String),
    #[error("graph must contain at least one task")]
    EmptyGraph,
}

/// A process could not be launched or supervised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{category} spawn failure: {message}")]
pub struct SpawnError {
    pub category: ErrorCategory,
    pub message: String,
}

impl SpawnError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Maps an I/O failure from process launch onto the error taxonomy.
    pub fn from_io(program: &str, error: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let category = match error.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                ErrorCategory::Permanent
            }
            _ => ErrorCategory::ResourceExhaustion,
        };
        Self::new(category, format!("failed to launch '{program}': {error}"))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Validation(#[from] GraphValidationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("task worker failed: {0}")]
    Join(String),
    #[error("executor invariant violated: {0}")]
    InvariantViolation(String),
    #[error("summary serialization error: {0}")]
    SummarySerde(String),
}
