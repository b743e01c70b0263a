use crate::breaker::{Admission, CircuitBreakerRegistry};
use crate::builder::GraphBuilder;
use crate::config::EngineConfig;
use crate::errors::{ExecutionError, SpawnError};
use crate::model::{
    ErrorCategory, ExecutionResult, Outcome, ProcessOutput, RecoverySummary, RunStatus, Task,
    TaskGraph, TaskReport, TaskState,
};
use crate::recovery::{FailureContext, NextAction, decide, task_rng};
use crate::spawner::{ProcessSpawner, Spawner};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Drives validated task graphs level by level through the spawner, applying
/// circuit breakers, timeouts, retries and fallbacks.
pub struct Orchestrator<S> {
    spawner: Arc<S>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: Arc<EngineConfig>,
}

impl Orchestrator<ProcessSpawner> {
    /// Orchestrator that launches real processes.
    pub fn from_config(config: EngineConfig) -> Self {
        let spawner = ProcessSpawner::new(config.execution.max_output_bytes);
        Self::new(spawner, config)
    }
}

impl<S: Spawner + 'static> Orchestrator<S> {
    pub fn new(spawner: S, config: EngineConfig) -> Self {
        let breakers = Arc::new(config.breaker_registry());
        Self {
            spawner: Arc::new(spawner),
            breakers,
            config: Arc::new(config),
        }
    }

    /// Shares an existing registry so breaker state outlives a single orchestrator.
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = breakers;
        self
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates the submission, then runs it to a terminal status.
    pub async fn submit(&self, builder: GraphBuilder) -> Result<RecoverySummary, ExecutionError> {
        self.submit_with_cancel(builder, CancellationToken::new())
            .await
    }

    pub async fn submit_with_cancel(
        &self,
        builder: GraphBuilder,
        cancel: CancellationToken,
    ) -> Result<RecoverySummary, ExecutionError> {
        let name = builder.name().to_string();
        let graph = builder.build().inspect_err(|error| {
            warn!(graph = %name, %error, "rejected graph submission");
        })?;
        self.run_with_cancel(&graph, cancel).await
    }

    pub async fn run(&self, graph: &TaskGraph) -> Result<RecoverySummary, ExecutionError> {
        self.run_with_cancel(graph, CancellationToken::new()).await
    }

    pub async fn run_with_cancel(
        &self,
        graph: &TaskGraph,
        cancel: CancellationToken,
    ) -> Result<RecoverySummary, ExecutionError> {
        let mut summary = RecoverySummary::new(graph);
        summary.status = RunStatus::Running;
        info!(
            run_id = %graph.run_id,
            graph = %graph.name,
            tasks = graph.len(),
            levels = graph.total_levels(),
            "run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.execution.max_concurrency.max(1)));
        let mut states: HashMap<String, TaskState> = HashMap::with_capacity(graph.len());
        let mut aborted = false;
        let mut cancel_observed = false;

        for (level, task_ids) in graph.levels.iter().enumerate() {
            if aborted || cancel.is_cancelled() {
                cancel_observed |= !aborted;
                let reason = if aborted {
                    "run aborted after a permanent failure"
                } else {
                    "run cancelled"
                };
                for task_id in task_ids {
                    let task = lookup(graph, task_id)?;
                    let outcome = TaskOutcome::not_run(task, TaskState::Skipped, reason);
                    absorb(&mut summary, &mut states, outcome);
                }
                continue;
            }

            debug!(run_id = %graph.run_id, level, tasks = task_ids.len(), "starting level");
            let mut workers = JoinSet::new();
            for task_id in task_ids {
                let task = lookup(graph, task_id)?;
                let failed_dependency = task
                    .depends_on
                    .iter()
                    .find(|dep| !states.get(dep.as_str()).is_some_and(|state| state.is_success()));
                if let Some(dependency) = failed_dependency {
                    info!(task_id = %task.task_id, dependency = %dependency, "skipping task");
                    let outcome = TaskOutcome::not_run(
                        task,
                        TaskState::Skipped,
                        format!("dependency {dependency} did not succeed"),
                    );
                    absorb(&mut summary, &mut states, outcome);
                    continue;
                }

                let worker = TaskWorker {
                    spawner: Arc::clone(&self.spawner),
                    breakers: Arc::clone(&self.breakers),
                    config: Arc::clone(&self.config),
                    semaphore: Arc::clone(&semaphore),
                    cancel: cancel.clone(),
                    task: task.clone(),
                };
                workers.spawn(worker.run());
            }

            while let Some(joined) = workers.join_next().await {
                let outcome = joined.map_err(|e| ExecutionError::Join(e.to_string()))?;
                cancel_observed |= outcome.cancelled;
                absorb(&mut summary, &mut states, outcome);
            }

            let permanent_failure = task_ids
                .iter()
                .find(|id| states.get(id.as_str()) == Some(&TaskState::PermanentlyFailed));
            if self.config.execution.abort_on_permanent_failure
                && let Some(task_id) = permanent_failure
            {
                warn!(run_id = %graph.run_id, level, %task_id, "aborting run after permanent failure");
                aborted = true;
            }
        }

        let all_succeeded = graph
            .tasks
            .keys()
            .all(|id| states.get(id).is_some_and(|state| state.is_success()));
        let status = if cancel_observed {
            RunStatus::Cancelled
        } else if aborted {
            RunStatus::Aborted
        } else if all_succeeded {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        summary.finalize(status);

        let counts = summary.counts;
        info!(
            run_id = %graph.run_id,
            status = ?status,
            succeeded = counts.total_succeeded(),
            failed = counts.permanently_failed,
            skipped = counts.skipped,
            circuit_open = counts.circuit_open,
            cancelled = counts.cancelled,
            "run finished"
        );
        Ok(summary)
    }
}

fn lookup<'a>(graph: &'a TaskGraph, task_id: &str) -> Result<&'a Task, ExecutionError> {
    graph.task(task_id).ok_or_else(|| {
        ExecutionError::InvariantViolation(format!("task missing from graph: {task_id}"))
    })
}

fn absorb(
    summary: &mut RecoverySummary,
    states: &mut HashMap<String, TaskState>,
    outcome: TaskOutcome,
) {
    states.insert(outcome.report.task_id.clone(), outcome.report.state);
    for result in outcome.results {
        summary.record_result(result);
    }
    summary.record_task(outcome.report);
}

struct TaskOutcome {
    report: TaskReport,
    results: Vec<ExecutionResult>,
    cancelled: bool,
}

impl TaskOutcome {
    fn not_run(task: &Task, state: TaskState, reason: impl Into<String>) -> Self {
        let outcome = match state {
            TaskState::CircuitOpen => Outcome::CircuitOpen,
            _ => Outcome::Skipped,
        };
        let result = ExecutionResult::not_run(&task.task_id, outcome, reason);
        Self {
            report: TaskReport {
                task_id: task.task_id.clone(),
                agent: task.agent.clone(),
                level: task.level,
                state,
                attempts: 0,
                last_error: result.error.clone(),
                last_category: None,
            },
            results: vec![result],
            cancelled: false,
        }
    }
}

/// Owns everything one task needs so it can run as an independent tokio task.
struct TaskWorker<S> {
    spawner: Arc<S>,
    breakers: Arc<CircuitBreakerRegistry>,
    config: Arc<EngineConfig>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    task: Task,
}

impl<S: Spawner + 'static> TaskWorker<S> {
    async fn run(self) -> TaskOutcome {
        let task = &self.task;

        // Holding the permit across backoff sleeps keeps retries inside the concurrency budget.
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return TaskOutcome::not_run(task, TaskState::Skipped, "run cancelled");
            }
            permit = Arc::clone(&self.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    return TaskOutcome::not_run(task, TaskState::Skipped, "run cancelled");
                }
            },
        };

        let admission = self.breakers.admit(&task.agent);
        if !admission.is_admitted() {
            warn!(task_id = %task.task_id, agent = %task.agent, "circuit open, failing fast");
            return TaskOutcome::not_run(
                task,
                TaskState::CircuitOpen,
                format!("circuit open for agent {}", task.agent),
            );
        }

        let policy = &self.config.retry;
        let mut rng = task_rng(policy.seed, &task.task_id);
        let mut invocation = task.invocation.clone();
        let mut fallback_used = false;
        let mut previous_delay = None;
        let mut results = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let deadline = self.config.timeout.deadline_for(task);
            let started_at = Utc::now();
            let clock = Instant::now();
            info!(
                task_id = %task.task_id,
                agent = %task.agent,
                level = task.level,
                attempt,
                fallback = fallback_used,
                command = %invocation.display_command(),
                "attempt started"
            );

            let spawned = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                spawned = self.spawner.run(&invocation, deadline) => Some(spawned),
            };
            let Some(spawned) = spawned else {
                results.push(cancelled_result(task, attempt, fallback_used, started_at, clock));
                return self.cancelled(admission, results, attempt);
            };

            let (result, category) = match spawned {
                Ok(output) => {
                    let category = self.config.classify.classify(&output);
                    let result =
                        process_result(task, attempt, fallback_used, started_at, output, category);
                    (result, category)
                }
                Err(error) => (
                    spawn_failure_result(task, attempt, fallback_used, started_at, clock, &error),
                    Some(error.category),
                ),
            };
            let last_error = result.error.clone();
            results.push(result);

            let Some(category) = category else {
                self.breakers.record_success(&task.agent);
                let state = if fallback_used {
                    TaskState::FellBack
                } else {
                    TaskState::Succeeded
                };
                info!(task_id = %task.task_id, attempt, state = ?state, "task succeeded");
                return self.finish(state, attempt, results, None, None);
            };

            warn!(
                task_id = %task.task_id,
                agent = %task.agent,
                attempt,
                category = %category,
                error = last_error.as_deref().unwrap_or_default(),
                "attempt failed"
            );
            if category == ErrorCategory::ResourceExhaustion {
                self.breakers.record_failure(&task.agent);
            }

            let context = FailureContext {
                attempt,
                category,
                fallback: task.fallback.as_ref(),
                fallback_used,
                previous_delay,
            };
            match decide(policy, &context, &mut rng) {
                NextAction::Retry { delay } => {
                    debug!(
                        task_id = %task.task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        state = ?TaskState::FailedRetryPending,
                        "retry scheduled"
                    );
                    previous_delay = Some(delay);
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return self.cancelled(admission, results, attempt),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                NextAction::Fallback { invocation: backup } => {
                    info!(
                        task_id = %task.task_id,
                        command = %backup.display_command(),
                        "switching to fallback"
                    );
                    invocation = backup;
                    fallback_used = true;
                }
                NextAction::GiveUp => {
                    if category != ErrorCategory::ResourceExhaustion {
                        self.breakers.record_failure(&task.agent);
                    }
                    warn!(task_id = %task.task_id, attempt, category = %category, "task permanently failed");
                    return self.finish(
                        TaskState::PermanentlyFailed,
                        attempt,
                        results,
                        last_error,
                        Some(category),
                    );
                }
            }
        }
    }

    fn cancelled(
        &self,
        admission: Admission,
        results: Vec<ExecutionResult>,
        attempts: u32,
    ) -> TaskOutcome {
        // A half-open trial that never reached a verdict must not wedge the breaker.
        self.breakers.release(&self.task.agent, admission);
        info!(task_id = %self.task.task_id, attempts, "task cancelled");
        let mut outcome = self.finish(
            TaskState::Cancelled,
            attempts,
            results,
            Some("run cancelled".to_string()),
            None,
        );
        outcome.cancelled = true;
        outcome
    }

    fn finish(
        &self,
        state: TaskState,
        attempts: u32,
        results: Vec<ExecutionResult>,
        last_error: Option<String>,
        last_category: Option<ErrorCategory>,
    ) -> TaskOutcome {
        TaskOutcome {
            report: TaskReport {
                task_id: self.task.task_id.clone(),
                agent: self.task.agent.clone(),
                level: self.task.level,
                state,
                attempts,
                last_error,
                last_category,
            },
            results,
            cancelled: false,
        }
    }
}

fn process_result(
    task: &Task,
    attempt: u32,
    used_fallback: bool,
    started_at: DateTime<Utc>,
    output: ProcessOutput,
    category: Option<ErrorCategory>,
) -> ExecutionResult {
    let (outcome, error) = match (category, output.timed_out, output.exit_code) {
        (None, _, _) => (Outcome::Success, None),
        (Some(_), true, _) => (
            Outcome::TimedOut,
            Some(format!("timed out after {} ms", output.duration.as_millis())),
        ),
        (Some(_), false, Some(code)) => (Outcome::Failed, Some(format!("exited with code {code}"))),
        (Some(_), false, None) => (Outcome::Failed, Some("terminated by signal".to_string())),
    };
    ExecutionResult {
        task_id: task.task_id.clone(),
        outcome,
        attempt,
        exit_code: output.exit_code,
        duration: output.duration,
        output: output.output,
        category,
        error,
        used_fallback,
        started_at,
    }
}

fn spawn_failure_result(
    task: &Task,
    attempt: u32,
    used_fallback: bool,
    started_at: DateTime<Utc>,
    clock: Instant,
    error: &SpawnError,
) -> ExecutionResult {
    ExecutionResult {
        task_id: task.task_id.clone(),
        outcome: Outcome::Failed,
        attempt,
        exit_code: None,
        duration: clock.elapsed(),
        output: Default::default(),
        category: Some(error.category),
        error: Some(error.message.clone()),
        used_fallback,
        started_at,
    }
}

fn cancelled_result(
    task: &Task,
    attempt: u32,
    used_fallback: bool,
    started_at: DateTime<Utc>,
    clock: Instant,
) -> ExecutionResult {
    ExecutionResult {
        task_id: task.task_id.clone(),
        outcome: Outcome::Failed,
        attempt,
        exit_code: None,
        duration: clock.elapsed(),
        output: Default::default(),
        category: None,
        error: Some("cancelled while running".to_string()),
        used_fallback,
        started_at,
    }
}
