use anyhow::{Context, Result, anyhow};
use graft_core::{GraphBuilder, Invocation};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct GraphFile {
    pub name: String,
    pub tasks: Vec<GraphTask>,
}

#[derive(Debug, Deserialize)]
pub struct GraphTask {
    pub task_id: String,
    pub agent: String,
    #[serde(flatten)]
    pub command: CommandSpec,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub fallback: Option<CommandSpec>,
    pub fallback_from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    fn into_invocation(self) -> Invocation {
        let mut invocation = Invocation::new(self.command).args(self.args);
        invocation.working_dir = self.working_dir;
        invocation.env = self.env;
        invocation
    }
}

pub fn read_graph(path: &Path) -> Result<GraphBuilder> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: GraphFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse graph file {}", path.display()))?;
    build_graph(file)
}

pub fn build_graph(file: GraphFile) -> Result<GraphBuilder> {
    let mut builder = GraphBuilder::new(&file.name);
    for task in file.tasks {
        if task.fallback.is_some() && task.fallback_from.is_some() {
            return Err(anyhow!(
                "task {} sets both fallback and fallback_from",
                task.task_id
            ));
        }

        let mut task_builder = builder
            .task(&task.task_id)
            .agent(task.agent)
            .invocation(task.command.into_invocation());

        if !task.depends_on.is_empty() {
            task_builder = task_builder.depends_on(task.depends_on);
        }

        if let Some(timeout_seconds) = task.timeout_seconds {
            task_builder = task_builder.timeout(Duration::from_secs(timeout_seconds));
        }

        if let Some(fallback) = task.fallback {
            task_builder = task_builder.fallback(fallback.into_invocation());
        }

        if let Some(other) = task.fallback_from {
            task_builder = task_builder.fallback_from(other);
        }

        let _ = task_builder;
    }

    Ok(builder)
}
