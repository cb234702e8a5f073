//! End-to-end uniqueness pass/fail, driven through the real orchestrator
//! against a scripted warehouse — the same wiring `dqe-runtime` assembles
//! in production, minus the real Snowflake adapter.

use std::sync::Arc;

use dqe_artifacts::{ArtifactWriter, LocalFsArtifactStore};
use dqe_bus::ProgressBus;
use dqe_orchestrator::{CancelToken, Orchestrator, RunOptions, StaticSuiteRegistry, SuiteRegistry};
use dqe_schemas::{Gate, RunStatus, RunTestStatus, Severity, TestDefinition, TestKind, TestSuite};
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

fn uniqueness_test() -> TestDefinition {
    TestDefinition {
        name: "orders_unique_by_id".to_string(),
        kind: TestKind::Uniqueness,
        dataset: "PROD.RAW.ORDERS".to_string(),
        keys: vec!["ORDER_ID".to_string()],
        expression: None,
        window: None,
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

async fn run_one(
    pool: sqlx::PgPool,
    adapter: ScriptedWarehouseAdapter,
) -> dqe_orchestrator::RunOutcome {
    let warehouse = WarehouseClient::new(adapter, settings());
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
    let bus = ProgressBus::new();
    let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());
    let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);

    let suite = TestSuite {
        name: "orders_suite".to_string(),
        connection: "snowflake_prod".to_string(),
        tests: vec![uniqueness_test()],
        tags: vec![],
    };

    orchestrator
        .run_suite(suite, "ci", "snowflake_prod", RunOptions::default(), CancelToken::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn uniqueness_test_passes_when_the_warehouse_reports_no_duplicates() {
    let Some(pool) = pool().await else { return };

    let adapter = ScriptedWarehouseAdapter::new().push_explain(0).push_select(vec![]);
    let outcome = run_one(pool, adapter).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tests.len(), 1);
    assert_eq!(outcome.tests[0].status, RunTestStatus::Pass);
    assert_eq!(outcome.tests[0].observed["duplicate_groups"], json!(0));
}

#[tokio::test]
async fn uniqueness_test_fails_and_records_a_sample_when_duplicates_are_reported() {
    let Some(pool) = pool().await else { return };

    let mut row_a = serde_json::Map::new();
    row_a.insert("ORDER_ID".to_string(), json!(1));
    row_a.insert("DUPLICATE_COUNT".to_string(), json!(3));
    let mut row_b = serde_json::Map::new();
    row_b.insert("ORDER_ID".to_string(), json!(2));
    row_b.insert("DUPLICATE_COUNT".to_string(), json!(2));

    let adapter = ScriptedWarehouseAdapter::new()
        .push_explain(0)
        .push_select(vec![row_a, row_b]);
    let outcome = run_one(pool, adapter).await;

    assert_eq!(outcome.run.status, RunStatus::Completed);
    assert_eq!(outcome.tests[0].status, RunTestStatus::Fail);
    assert_eq!(outcome.tests[0].observed["duplicate_groups"], json!(2));
    assert!(outcome.tests[0].observed["sample"].as_array().is_some());
}
