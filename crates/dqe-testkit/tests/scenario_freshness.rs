//! Freshness pass/fail against the same `HOURS_LAG` row, varying only the
//! test's allowed window — the evaluator's own decision boundary, driven
//! end to end through the orchestrator.

use std::sync::Arc;

use dqe_artifacts::{ArtifactWriter, LocalFsArtifactStore};
use dqe_bus::ProgressBus;
use dqe_orchestrator::{CancelToken, Orchestrator, RunOptions, StaticSuiteRegistry, SuiteRegistry};
use dqe_schemas::{Gate, RunStatus, RunTestStatus, Severity, TestDefinition, TestKind, TestSuite, Window};
use dqe_testkit::ScriptedWarehouseAdapter;
use dqe_warehouse::{AuthMethod, ConnectSettings, WarehouseClient};
use serde_json::json;

fn settings() -> ConnectSettings {
    ConnectSettings {
        account: "acct".to_string(),
        user: "user".to_string(),
        auth: AuthMethod::Password,
        role: "analyst".to_string(),
        warehouse: "wh".to_string(),
        database: "PROD".to_string(),
        schema: "RAW".to_string(),
        region: None,
        host: None,
        statement_timeout_s: 60,
        query_tag: "dqe".to_string(),
        scan_budget_bytes: None,
        sample_limit: 100,
        allowed_schemas: vec![],
    }
}

fn freshness_test(last_hours: u32) -> TestDefinition {
    TestDefinition {
        name: "orders_fresh".to_string(),
        kind: TestKind::Freshness,
        dataset: "PROD.RAW.ORDERS".to_string(),
        keys: vec!["ORDER_TS".to_string()],
        expression: None,
        window: Some(Window::LastHours { hours: last_hours }),
        filters: vec![],
        tolerance: None,
        severity: Severity::Major,
        gate: Gate::Fail,
    }
}

async fn pool() -> Option<sqlx::PgPool> {
    if std::env::var(dqe_store::ENV_DB_URL).is_err() {
        eprintln!("SKIP: {} not set", dqe_store::ENV_DB_URL);
        return None;
    }
    let pool = dqe_store::connect_from_env().await.ok()?;
    dqe_store::migrate(&pool).await.ok()?;
    Some(pool)
}

async fn run_freshness(pool: sqlx::PgPool, last_hours: u32) -> dqe_orchestrator::RunOutcome {
    let mut row = serde_json::Map::new();
    row.insert("HOURS_LAG".to_string(), json!(2.0));
    row.insert("MAX_TS".to_string(), json!("2026-07-29T00:00:00Z"));

    let adapter = ScriptedWarehouseAdapter::new().push_explain(0).push_select(vec![row]);
    let warehouse = WarehouseClient::new(adapter, settings());
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
    let bus = ProgressBus::new();
    let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());
    let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);

    let suite = TestSuite {
        name: "orders_suite".to_string(),
        connection: "snowflake_prod".to_string(),
        tests: vec![freshness_test(last_hours)],
        tags: vec![],
    };

    orchestrator
        .run_suite(suite, "ci", "snowflake_prod", RunOptions::default(), CancelToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn two_hour_lag_passes_a_twenty_four_hour_window() {
    let Some(pool) = pool().await else { return };

    let outcome = run_freshness(pool, 24).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tests[0].status, RunTestStatus::Pass);
    assert_eq!(outcome.tests[0].observed["hours_lag"], json!(2.0));
}

#[tokio::test]
async fn two_hour_lag_fails_a_one_hour_window() {
    let Some(pool) = pool().await else { return };

    let outcome = run_freshness(pool, 1).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tests[0].status, RunTestStatus::Fail);
    assert_eq!(outcome.tests[0].observed["hours_lag"], json!(2.0));
}
