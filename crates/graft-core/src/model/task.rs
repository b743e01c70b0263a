use crate::model::Invocation;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub agent: String,
    pub level: u32,
    pub invocation: Invocation,
    pub depends_on: Vec<String>,
    pub downstream: Vec<String>,
    pub timeout: Option<Duration>,
    pub fallback: Option<Invocation>,
}
