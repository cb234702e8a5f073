//! Artifact Writer — writes `report.json`, `logs.txt`, and per-test sample
//! rows under deterministic keys and returns opaque locators (§4.H, §6).
//!
//! Grounded in the teacher's `mqk-artifacts`: explicit, deterministic IO
//! functions with no network of their own, generalized from "one run
//! directory on local disk" to a storage-backend trait so an object-store
//! adapter can slot in later without touching call sites. Safety default:
//! if the backend errors, the writer logs and returns `None` — artifact
//! presence is advisory, never required for a run to complete.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Utc};
use dqe_schemas::{Artifact, ArtifactKind, Run, RunStatus, RunTest};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

mod local_fs;

pub use local_fs::LocalFsArtifactStore;

/// Default presign TTL for locators the store hands back (§6: "e.g. 7 days").
pub const DEFAULT_PRESIGN_TTL_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub url: Option<String>,
    pub size_bytes: i64,
}

/// Bare storage transport. The only implementor shipped here is
/// [`LocalFsArtifactStore`]; a real object-store (S3/GCS/Azure Blob)
/// adapter is an external integration, matching "storage backends...
/// are external services" (§1).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<WriteOutcome>;
}

/// Deterministic storage key: `runs/YYYY/MM/DD/<run_id>/<name>` (§6).
pub fn artifact_key(run_id: Uuid, started_at: DateTime<Utc>, name: &str) -> String {
    format!(
        "runs/{:04}/{:02}/{:02}/{}/{}",
        started_at.year(),
        started_at.month(),
        started_at.day(),
        run_id,
        name
    )
}

#[derive(Debug, Serialize)]
struct ReportSummary {
    total: usize,
    passed: usize,
    failed: usize,
    error: usize,
    /// `None` (serialized `null`) for an empty suite — never divide by zero
    /// (§8 boundary behavior).
    success_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ReportTestResult<'a> {
    name: &'a str,
    kind: &'a str,
    status: &'a str,
    observed: &'a Value,
    expected: &'a Value,
    query_id: &'a Option<String>,
    error_message: &'a Option<String>,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    run_id: Uuid,
    suite_name: &'a str,
    status: &'a str,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    bytes_scanned: Option<i64>,
    environment: &'a str,
    connection: &'a str,
    query_ids: &'a [String],
    summary: ReportSummary,
    test_results: Vec<ReportTestResult<'a>>,
    generated_at: DateTime<Utc>,
    version: &'static str,
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn run_test_status_str(status: dqe_schemas::RunTestStatus) -> &'static str {
    match status {
        dqe_schemas::RunTestStatus::Pass => "pass",
        dqe_schemas::RunTestStatus::Fail => "fail",
        dqe_schemas::RunTestStatus::Error => "error",
        dqe_schemas::RunTestStatus::Skip => "skip",
    }
}

fn build_report<'a>(run: &'a Run, tests: &'a [RunTest]) -> Report<'a> {
    use dqe_schemas::RunTestStatus::*;

    let total = tests.len();
    let mut passed = 0;
    let mut failed = 0;
    let mut errored = 0;
    for t in tests {
        match t.status {
            Pass | Skip => passed += usize::from(t.status == Pass),
            Fail => failed += 1,
            Error => errored += 1,
        }
    }
    let success_rate = if total == 0 {
        None
    } else {
        Some(passed as f64 / total as f64)
    };

    Report {
        run_id: run.id,
        suite_name: &run.suite_name,
        status: run_status_str(run.status),
        started_at: run.started_at,
        finished_at: run.finished_at,
        duration_ms: run.duration_ms,
        bytes_scanned: run.bytes_scanned,
        environment: &run.environment,
        connection: &run.connection,
        query_ids: &run.query_ids,
        summary: ReportSummary {
            total,
            passed,
            failed,
            error: errored,
            success_rate,
        },
        test_results: tests
            .iter()
            .map(|t| ReportTestResult {
                name: &t.name,
                kind: &t.kind,
                status: run_test_status_str(t.status),
                observed: &t.observed,
                expected: &t.expected,
                query_id: &t.query_id,
                error_message: &t.error_message,
            })
            .collect(),
        generated_at: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// The writer itself: generic over the backend, like [`dqe_warehouse::WarehouseClient`]
/// is generic over its adapter.
pub struct ArtifactWriter<S: ArtifactStore> {
    store: S,
    presign_ttl_days: i64,
}

impl<S: ArtifactStore> ArtifactWriter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            presign_ttl_days: DEFAULT_PRESIGN_TTL_DAYS,
        }
    }

    pub fn with_presign_ttl_days(mut self, days: i64) -> Self {
        self.presign_ttl_days = days;
        self
    }

    fn artifact_from_outcome(
        &self,
        run_id: Uuid,
        kind: ArtifactKind,
        path: String,
        content_type: &str,
        outcome: WriteOutcome,
    ) -> Artifact {
        let created_at = Utc::now();
        Artifact {
            id: Uuid::new_v4(),
            run_id,
            kind,
            path,
            url: outcome.url,
            size_bytes: outcome.size_bytes,
            content_type: content_type.to_string(),
            created_at,
            expires_at: Some(created_at + Duration::days(self.presign_ttl_days)),
        }
    }

    /// Write `report.json`. Returns `None` (logged) if the backend fails —
    /// the run still completes (§4.H safety default).
    pub async fn write_report(&self, run: &Run, tests: &[RunTest]) -> Option<Artifact> {
        let report = build_report(run, tests);
        let bytes = match serde_json::to_vec_pretty(&report) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(run_id = %run.id, error = %e, "failed to serialize report.json");
                return None;
            }
        };
        let key = artifact_key(run.id, run.started_at, "report.json");
        self.put_or_log(run.id, ArtifactKind::Report, key, &bytes, "application/json")
            .await
    }

    /// Write `logs.txt`. `lines` are joined with `\n`; redaction of their
    /// contents is the caller's responsibility (this writer persists
    /// bytes, it does not scrub them).
    pub async fn write_logs(&self, run_id: Uuid, started_at: DateTime<Utc>, lines: &[String]) -> Option<Artifact> {
        let mut text = lines.join("\n");
        text.push('\n');
        let key = artifact_key(run_id, started_at, "logs.txt");
        self.put_or_log(run_id, ArtifactKind::Logs, key, text.as_bytes(), "text/plain")
            .await
    }

    /// Write one failing test's overflow sample rows under
    /// `samples/<test_name>_violations.json` (§6).
    pub async fn write_samples(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        test_name: &str,
        rows: &Value,
    ) -> Option<Artifact> {
        let bytes = match serde_json::to_vec_pretty(rows) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(run_id = %run_id, test = test_name, error = %e, "failed to serialize sample rows");
                return None;
            }
        };
        let key = artifact_key(run_id, started_at, &format!("samples/{test_name}_violations.json"));
        self.put_or_log(run_id, ArtifactKind::Samples, key, &bytes, "application/json")
            .await
    }

    async fn put_or_log(
        &self,
        run_id: Uuid,
        kind: ArtifactKind,
        key: String,
        bytes: &[u8],
        content_type: &str,
    ) -> Option<Artifact> {
        match self.store.put(&key, bytes, content_type).await {
            Ok(outcome) => Some(self.artifact_from_outcome(run_id, kind, key, content_type, outcome)),
            Err(e) => {
                tracing::warn!(run_id = %run_id, key, error = %e, "artifact store unavailable; run continues");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqe_schemas::{RunTestStatus};

    fn sample_run() -> Run {
        Run {
            id: Uuid::new_v4(),
            suite_name: "orders_suite".to_string(),
            status: RunStatus::Completed,
            started_at: Utc::now(),
            finished_at: Some(Utc::now()),
            duration_ms: Some(1234),
            bytes_scanned: Some(1000),
            query_ids: vec!["q1".to_string()],
            environment: "ci".to_string(),
            connection: "snowflake_prod".to_string(),
            error_message: None,
        }
    }

    fn sample_test(run_id: Uuid, status: RunTestStatus) -> RunTest {
        RunTest {
            id: Uuid::new_v4(),
            run_id,
            name: "uniqueness_order_id".to_string(),
            kind: "uniqueness".to_string(),
            status,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            duration_ms: 10,
            observed: serde_json::json!({"duplicate_groups": 0}),
            expected: serde_json::json!({}),
            query_id: Some("q1".to_string()),
            error_message: None,
        }
    }

    #[test]
    fn artifact_key_matches_deterministic_layout() {
        let run_id = Uuid::nil();
        let ts = "2026-07-28T10:00:00Z".parse().unwrap();
        let key = artifact_key(run_id, ts, "report.json");
        assert_eq!(
            key,
            format!("runs/2026/07/28/{run_id}/report.json")
        );
    }

    #[test]
    fn report_success_rate_is_none_for_empty_suite() {
        let run = sample_run();
        let report = build_report(&run, &[]);
        assert_eq!(report.summary.total, 0);
        assert!(report.summary.success_rate.is_none());
    }

    #[test]
    fn report_success_rate_counts_pass_and_skip_as_success() {
        let run = sample_run();
        let tests = vec![
            sample_test(run.id, RunTestStatus::Pass),
            sample_test(run.id, RunTestStatus::Skip),
            sample_test(run.id, RunTestStatus::Fail),
            sample_test(run.id, RunTestStatus::Error),
        ];
        let report = build_report(&run, &tests);
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.error, 1);
        assert_eq!(report.summary.success_rate, Some(0.25));
    }

    #[tokio::test]
    async fn write_report_round_trips_through_local_fs_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsArtifactStore::new(dir.path());
        let writer = ArtifactWriter::new(store);

        let run = sample_run();
        let tests = vec![sample_test(run.id, RunTestStatus::Pass)];
        let artifact = writer.write_report(&run, &tests).await.unwrap();

        assert_eq!(artifact.kind, ArtifactKind::Report);
        assert!(artifact.url.as_deref().unwrap().starts_with("file://"));
        assert!(artifact.expires_at.is_some());
    }
}
