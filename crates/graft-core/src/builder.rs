use crate::errors::GraphValidationError;
use crate::layers::assign_levels;
use crate::model::{Invocation, Task, TaskGraph};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
enum FallbackSpec {
    Inline(Invocation),
    FromTask(String),
}

#[derive(Debug, Clone)]
struct TaskSpec {
    task_id: String,
    agent: Option<String>,
    invocation: Option<Invocation>,
    depends_on: Vec<String>,
    timeout: Option<Duration>,
    fallback: Option<FallbackSpec>,
}

impl TaskSpec {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent: None,
            invocation: None,
            depends_on: Vec::new(),
            timeout: None,
            fallback: None,
        }
    }
}

pub struct GraphBuilder {
    name: String,
    tasks: Vec<TaskSpec>,
}

pub struct TaskBuilder<'a> {
    spec: &'a mut TaskSpec,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts defining a task with the provided task id.
    pub fn task(&mut self, task_id: &str) -> TaskBuilder<'_> {
        let index = self.tasks.len();
        self.tasks.push(TaskSpec::new(task_id));
        TaskBuilder {
            spec: &mut self.tasks[index],
        }
    }

    /// Validates the submission and computes execution levels.
    pub fn build(self) -> Result<TaskGraph, GraphValidationError> {
        if self.tasks.is_empty() {
            return Err(GraphValidationError::EmptyGraph);
        }

        let mut ids = HashSet::new();
        for spec in &self.tasks {
            validate_task_id(&spec.task_id)?;
            if !ids.insert(spec.task_id.clone()) {
                return Err(GraphValidationError::DuplicateTaskId(spec.task_id.clone()));
            }
            let has_agent = spec
                .agent
                .as_ref()
                .is_some_and(|value| !value.trim().is_empty());
            if !has_agent {
                return Err(GraphValidationError::MissingAgent(spec.task_id.clone()));
            }
            let has_command = spec
                .invocation
                .as_ref()
                .is_some_and(|invocation| !invocation.program.trim().is_empty());
            if !has_command {
                return Err(GraphValidationError::MissingCommand(spec.task_id.clone()));
            }
        }

        for spec in &self.tasks {
            for dependency in &spec.depends_on {
                if !ids.contains(dependency) {
                    return Err(GraphValidationError::MissingDependency(dependency.clone()));
                }
            }
            if let Some(FallbackSpec::FromTask(fallback)) = &spec.fallback {
                if fallback == &spec.task_id {
                    return Err(GraphValidationError::SelfFallback(spec.task_id.clone()));
                }
                if !ids.contains(fallback) {
                    return Err(GraphValidationError::MissingFallback {
                        task_id: spec.task_id.clone(),
                        fallback: fallback.clone(),
                    });
                }
            }
        }

        let invocations: HashMap<String, Invocation> = self
            .tasks
            .iter()
            .filter_map(|spec| {
                spec.invocation
                    .clone()
                    .map(|invocation| (spec.task_id.clone(), invocation))
            })
            .collect();

        let mut tasks: HashMap<String, Task> = HashMap::with_capacity(self.tasks.len());
        for spec in self.tasks {
            let fallback = match spec.fallback {
                Some(FallbackSpec::Inline(invocation)) => Some(invocation),
                Some(FallbackSpec::FromTask(other)) => invocations.get(&other).cloned(),
                None => None,
            };

            let task = Task {
                task_id: spec.task_id.clone(),
                agent: spec.agent.unwrap_or_default(),
                level: 0,
                invocation: spec.invocation.unwrap_or_default(),
                depends_on: spec.depends_on,
                downstream: Vec::new(),
                timeout: spec.timeout,
                fallback,
            };
            tasks.insert(task.task_id.clone(), task);
        }

        let edges: Vec<(String, String)> = tasks
            .values()
            .flat_map(|task| {
                task.depends_on
                    .iter()
                    .map(|dep| (dep.clone(), task.task_id.clone()))
            })
            .collect();
        for (parent, child) in edges {
            if let Some(task) = tasks.get_mut(&parent) {
                task.downstream.push(child);
            }
        }
        for task in tasks.values_mut() {
            task.downstream.sort();
        }

        let levels = assign_levels(&mut tasks)?;

        Ok(TaskGraph {
            run_id: format!("{}-{}", sanitize_name(&self.name), Uuid::new_v4()),
            name: self.name,
            created_at: Utc::now(),
            tasks,
            levels,
        })
    }
}

impl<'a> TaskBuilder<'a> {
    /// Sets the agent identity used as the circuit-breaker key.
    pub fn agent(self, agent: impl Into<String>) -> Self {
        self.spec.agent = Some(agent.into());
        self
    }

    /// Sets the resolved command for this task.
    pub fn invocation(self, invocation: Invocation) -> Self {
        self.spec.invocation = Some(invocation);
        self
    }

    /// Sets task dependencies by task id.
    pub fn depends_on<I, S>(self, depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.depends_on = depends_on.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides the attempt timeout for this task.
    pub fn timeout(self, timeout: Duration) -> Self {
        self.spec.timeout = Some(timeout);
        self
    }

    /// Runs `invocation` once when retries are exhausted or not allowed.
    pub fn fallback(self, invocation: Invocation) -> Self {
        self.spec.fallback = Some(FallbackSpec::Inline(invocation));
        self
    }

    /// Borrows the invocation of another task in the graph as the fallback.
    pub fn fallback_from(self, task_id: impl Into<String>) -> Self {
        self.spec.fallback = Some(FallbackSpec::FromTask(task_id.into()));
        self
    }
}

fn validate_task_id(task_id: &str) -> Result<(), GraphValidationError> {
    if task_id.starts_with('_') {
        return Err(GraphValidationError::ReservedTaskId(task_id.to_string()));
    }

    let mut chars = task_id.chars();
    let Some(first) = chars.next() else {
        return Err(GraphValidationError::InvalidTaskId(task_id.to_string()));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(GraphValidationError::InvalidTaskId(task_id.to_string()));
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-')) {
        return Err(GraphValidationError::InvalidTaskId(task_id.to_string()));
    }

    Ok(())
}

fn sanitize_name(name: &str) -> String {
    let normalized = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>();

    if normalized.is_empty() {
        "run".to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Invocation {
        Invocation::new("echo").arg("ok")
    }

    #[test]
    fn builds_diamond_graph_with_correct_wiring() {
        let mut graph = GraphBuilder::new("diamond");
        graph.task("a").agent("planner").invocation(echo());
        graph.task("b").agent("coder").invocation(echo()).depends_on(["a"]);
        graph.task("c").agent("coder").invocation(echo()).depends_on(["a"]);
        graph
            .task("d")
            .agent("reviewer")
            .invocation(echo())
            .depends_on(["b", "c"]);

        let graph = graph.build().expect("build should succeed");

        assert_eq!(graph.tasks["a"].downstream, vec!["b", "c"]);
        assert_eq!(graph.tasks["d"].depends_on, vec!["b", "c"]);
        assert_eq!(graph.total_levels(), 3);
        assert_eq!(graph.levels[1], vec!["b", "c"]);
        assert_eq!(graph.tasks["d"].level, 2);
        assert!(graph.run_id.starts_with("diamond-"));
    }

    #[test]
    fn rejects_cycle() {
        let mut graph = GraphBuilder::new("cycle");
        graph.task("a").agent("x").invocation(echo()).depends_on(["c"]);
        graph.task("b").agent("x").invocation(echo()).depends_on(["a"]);
        graph.task("c").agent("x").invocation(echo()).depends_on(["b"]);

        let err = graph.build().expect_err("cycle should fail");
        assert!(matches!(err, GraphValidationError::CycleDetected(_)));
    }

    #[test]
    fn rejects_missing_dependency() {
        let mut graph = GraphBuilder::new("missing");
        graph
            .task("a")
            .agent("x")
            .invocation(echo())
            .depends_on(["does-not-exist"]);

        let err = graph.build().expect_err("missing dependency should fail");
        assert_eq!(
            err,
            GraphValidationError::MissingDependency("does-not-exist".to_string())
        );
    }

    #[test]
    fn rejects_duplicate_task_id() {
        let mut graph = GraphBuilder::new("duplicate");
        graph.task("a").agent("x").invocation(echo());
        graph.task("a").agent("y").invocation(echo());

        let err = graph.build().expect_err("duplicate task id should fail");
        assert_eq!(err, GraphValidationError::DuplicateTaskId("a".to_string()));
    }

    #[test]
    fn rejects_missing_agent_and_command() {
        let mut no_agent = GraphBuilder::new("missing-agent");
        no_agent.task("a").agent("  ").invocation(echo());
        assert_eq!(
            no_agent.build().expect_err("blank agent should fail"),
            GraphValidationError::MissingAgent("a".to_string())
        );

        let mut no_command = GraphBuilder::new("missing-command");
        no_command.task("a").agent("x");
        assert_eq!(
            no_command.build().expect_err("missing command should fail"),
            GraphValidationError::MissingCommand("a".to_string())
        );
    }

    #[test]
    fn rejects_reserved_and_invalid_task_ids() {
        let mut reserved = GraphBuilder::new("reserved");
        reserved.task("_hidden").agent("x").invocation(echo());
        assert_eq!(
            reserved.build().expect_err("reserved task id should fail"),
            GraphValidationError::ReservedTaskId("_hidden".to_string())
        );

        let mut slash = GraphBuilder::new("invalid1");
        slash.task("foo/bar").agent("x").invocation(echo());
        assert_eq!(
            slash.build().expect_err("invalid char should fail"),
            GraphValidationError::InvalidTaskId("foo/bar".to_string())
        );

        let mut empty = GraphBuilder::new("invalid2");
        empty.task("").agent("x").invocation(echo());
        assert_eq!(
            empty.build().expect_err("empty id should fail"),
            GraphValidationError::InvalidTaskId(String::new())
        );
    }

    #[test]
    fn rejects_empty_graph() {
        let graph = GraphBuilder::new("empty");
        let err = graph.build().expect_err("empty graph should fail");
        assert_eq!(err, GraphValidationError::EmptyGraph);
    }

    #[test]
    fn resolves_fallback_by_task_id() {
        let mut graph = GraphBuilder::new("fallbacks");
        graph
            .task("primary")
            .agent("claude")
            .invocation(Invocation::new("claude").arg("-p"))
            .fallback_from("backup");
        graph
            .task("backup")
            .agent("codex")
            .invocation(Invocation::new("codex").arg("exec"));
        graph
            .task("inline")
            .agent("claude")
            .invocation(echo())
            .fallback(Invocation::new("true"));

        let graph = graph.build().expect("build should succeed");
        assert_eq!(
            graph.tasks["primary"].fallback,
            Some(Invocation::new("codex").arg("exec"))
        );
        assert_eq!(graph.tasks["inline"].fallback, Some(Invocation::new("true")));
        assert!(graph.tasks["backup"].fallback.is_none());
    }

    #[test]
    fn rejects_unknown_or_self_fallback() {
        let mut unknown = GraphBuilder::new("unknown");
        unknown
            .task("a")
            .agent("x")
            .invocation(echo())
            .fallback_from("ghost");
        assert_eq!(
            unknown.build().expect_err("unknown fallback should fail"),
            GraphValidationError::MissingFallback {
                task_id: "a".to_string(),
                fallback: "ghost".to_string(),
            }
        );

        let mut own = GraphBuilder::new("self");
        own.task("a").agent("x").invocation(echo()).fallback_from("a");
        assert_eq!(
            own.build().expect_err("self fallback should fail"),
            GraphValidationError::SelfFallback("a".to_string())
        );
    }

    #[test]
    fn sanitizes_graph_name_into_run_id() {
        let mut graph = GraphBuilder::new("nightly build/v2");
        graph.task("a").agent("x").invocation(echo());
        let graph = graph.build().expect("build should succeed");
        assert!(graph.run_id.starts_with("nightly-build-v2-"));
        assert_eq!(graph.name, "nightly build/v2");
    }
}
