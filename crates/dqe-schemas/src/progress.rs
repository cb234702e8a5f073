//! ProgressEvent — the transient envelope fanned out by the Live Progress
//! Bus. Never persisted (§3); only ever serialized onto an SSE-shaped wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    RunState,
    RunStatus,
    TestResult,
    Heartbeat,
    RunCompleted,
}

impl ProgressEventType {
    pub fn wire_name(&self) -> &'static str {
        match self {
            ProgressEventType::RunState => "run_state",
            ProgressEventType::RunStatus => "run_status",
            ProgressEventType::TestResult => "test_result",
            ProgressEventType::Heartbeat => "heartbeat",
            ProgressEventType::RunCompleted => "run_completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: ProgressEventType,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}
