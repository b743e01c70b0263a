#![cfg(unix)]

use graft_core::{
    EngineConfig, ErrorCategory, GraphBuilder, Invocation, Orchestrator, Outcome, RunStatus,
    TaskState,
};
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.backoff.initial_interval_ms = 10;
    config.retry.backoff.max_interval_ms = 50;
    config.retry.seed = Some(11);
    config
}

fn record(log: &Path, name: &str) -> Invocation {
    Invocation::shell(format!("echo {name} >> '{}'", log.display()))
}

fn ran(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn failed_branch_skips_its_dependents_and_run_completes_other_levels() {
    let dir = tempdir().expect("create temp dir");
    let log = dir.path().join("ran.log");

    let mut graph = GraphBuilder::new("agent-pipeline");
    graph.task("A").agent("planner").invocation(record(&log, "A"));
    graph
        .task("B")
        .agent("coder")
        .invocation(Invocation::shell(format!(
            "echo B >> '{}'; echo 'syntax error' >&2; exit 2",
            log.display()
        )))
        .depends_on(["A"]);
    graph
        .task("C")
        .agent("tester")
        .invocation(record(&log, "C"))
        .depends_on(["A"]);
    graph
        .task("D")
        .agent("reviewer")
        .invocation(record(&log, "D"))
        .depends_on(["B"]);

    let orchestrator = Orchestrator::from_config(fast_config());
    let summary = orchestrator.submit(graph).await.expect("run graph");

    assert_eq!(summary.state_of("A"), Some(TaskState::Succeeded));
    assert_eq!(summary.state_of("B"), Some(TaskState::PermanentlyFailed));
    assert_eq!(summary.state_of("C"), Some(TaskState::Succeeded));
    assert_eq!(summary.state_of("D"), Some(TaskState::Skipped));
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.total_levels, 3);

    let b = summary.results_for("B").next().expect("result for B");
    assert_eq!(b.exit_code, Some(2));
    assert_eq!(b.category, Some(ErrorCategory::Permanent));
    assert!(b.output.stderr.contains("syntax error"));

    let mut executed = ran(&log);
    executed.sort();
    assert_eq!(executed, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn transient_exit_is_retried_until_it_succeeds() {
    let dir = tempdir().expect("create temp dir");
    let marker = dir.path().join("attempted");
    let script = format!(
        "if [ -f '{0}' ]; then echo done; else touch '{0}'; exit 75; fi",
        marker.display()
    );

    let mut graph = GraphBuilder::new("flaky");
    graph
        .task("fetch")
        .agent("fetcher")
        .invocation(Invocation::shell(script));

    let orchestrator = Orchestrator::from_config(fast_config());
    let summary = orchestrator.submit(graph).await.expect("run graph");

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.counts.retried_then_succeeded, 1);
    let outcomes: Vec<Outcome> = summary.results.iter().map(|r| r.outcome).collect();
    assert_eq!(outcomes, vec![Outcome::Failed, Outcome::Success]);
    assert_eq!(summary.results[1].output.stdout, "done\n");
}

#[tokio::test]
async fn timed_out_task_recovers_through_fallback() {
    let mut config = fast_config();
    config.retry.max_attempts = 1;

    let mut graph = GraphBuilder::new("timeout");
    graph
        .task("summarize")
        .agent("slow-model")
        .invocation(Invocation::shell("sleep 10"))
        .timeout(Duration::from_secs(1))
        .fallback(Invocation::shell("echo cached summary"));

    let orchestrator = Orchestrator::from_config(config);
    let summary = orchestrator.submit(graph).await.expect("run graph");

    assert_eq!(summary.state_of("summarize"), Some(TaskState::FellBack));
    assert_eq!(summary.status, RunStatus::Completed);

    let results: Vec<_> = summary.results_for("summarize").collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].outcome, Outcome::TimedOut);
    assert_eq!(results[0].category, Some(ErrorCategory::Timeout));
    assert!(results[0].duration < Duration::from_secs(3));
    assert!(results[1].used_fallback);
    assert_eq!(results[1].output.stdout, "cached summary\n");
}
