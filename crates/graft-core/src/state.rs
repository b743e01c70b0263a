use crate::model::RecoverySummary;
use bytes::Bytes;

pub fn serialize_summary(summary: &RecoverySummary) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(summary).map(Bytes::from)
}

pub fn deserialize_summary(data: &[u8]) -> Result<RecoverySummary, serde_json::Error> {
    serde_json::from_slice(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GraphBuilder;
    use crate::model::{
        ErrorCategory, ExecutionResult, Invocation, Outcome, RunStatus, TaskReport, TaskState,
    };
    use serde_json::Value;

    #[test]
    fn summary_json_is_stable_and_restorable() {
        let mut graph = GraphBuilder::new("state-serde");
        graph.task("a").agent("coder").invocation(Invocation::new("true"));
        graph
            .task("b")
            .agent("coder")
            .invocation(Invocation::new("false"))
            .depends_on(["a"]);
        let graph = graph.build().expect("build graph");

        let mut summary = RecoverySummary::new(&graph);
        summary.record_result(ExecutionResult::not_run("b", Outcome::Skipped, "upstream"));
        summary.record_task(TaskReport {
            task_id: "b".to_string(),
            agent: "coder".to_string(),
            level: 1,
            state: TaskState::Skipped,
            attempts: 0,
            last_error: Some("upstream".to_string()),
            last_category: Some(ErrorCategory::ResourceExhaustion),
        });
        summary.finalize(RunStatus::Failed);

        let encoded = serialize_summary(&summary).expect("serialize summary");
        let decoded = deserialize_summary(&encoded).expect("deserialize summary");
        assert_eq!(decoded, summary);

        let json: Value = serde_json::from_slice(&encoded).expect("decode json value");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["total_levels"], 2);
        assert_eq!(json["tasks"][0]["state"], "skipped");
        assert_eq!(json["tasks"][0]["last_category"], "resource_exhaustion");
        assert_eq!(json["results"][0]["outcome"], "skipped");
        assert_eq!(json["results"][0]["exit_code"], Value::Null);
    }
}
