mod graph;
mod invocation;
mod result;
mod retry;
mod status;
mod summary;
mod task;

pub use graph::TaskGraph;
pub use invocation::Invocation;
pub use result::{CapturedOutput, ExecutionResult, ProcessOutput};
pub use retry::{
    BackoffPolicy, BackoffShape, RecoveryPolicy, base_backoff_duration, calculate_backoff_with_rng,
};
pub use status::{ErrorCategory, Outcome, RunStatus, TaskState};
pub use summary::{RecoverySummary, SummaryCounts, TaskReport};
pub use task::Task;
