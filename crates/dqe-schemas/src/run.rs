//! Run / RunTest / Artifact — the durable records a run produces.
//!
//! State transitions for [`RunStatus`] are enforced by the orchestrator's
//! own state machine (`dqe-orchestrator`); this module only defines the
//! shapes, not the legality of moving between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never transition again (§3 invariants).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTestStatus {
    Pass,
    Fail,
    Error,
    Skip,
}

impl RunTestStatus {
    /// Every `RunTestStatus` variant is terminal by construction — a
    /// `RunTest` is only ever written once, in its final state (§3).
    pub fn is_terminal(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub suite_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub bytes_scanned: Option<i64>,
    #[serde(default)]
    pub query_ids: Vec<String>,
    pub environment: String,
    pub connection: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTest {
    pub id: Uuid,
    pub run_id: Uuid,
    pub name: String,
    pub kind: String,
    pub status: RunTestStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub observed: Value,
    pub expected: Value,
    pub query_id: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Report,
    Logs,
    Samples,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub run_id: Uuid,
    pub kind: ArtifactKind,
    /// Opaque storage key, e.g. `runs/2026/07/28/<run_id>/report.json`.
    pub path: String,
    /// Time-limited locator, if the backend issued one.
    pub url: Option<String>,
    pub size_bytes: i64,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }
}
