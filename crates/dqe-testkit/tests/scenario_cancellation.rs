//! Cancelling mid-suite: the orchestrator stops dispatching new tests and
//! the run lands in `cancelled`, not `completed` or `failed`.

use std::sync::Arc;

use dqe_artifacts::{ArtifactWriter, LocalFsArtifactStore};
use dqe_bus::ProgressBus;
use dqe_orchestrator::{CancelToken, Orchestrator, RunOptions, StaticSuiteRegistry, SuiteRegistry};
use dqe_schemas::{Gate, RunStatus, Severity, TestDefinition, TestKind, TestSuite};
use dqe_testkit::ScriptedWarehouseAdapter;
use dqe_warehouse::{AuthMethod, ConnectSettings, WarehouseClient};

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

fn row_count_test(name: &str) -> TestDefinition {
    TestDefinition {
        name: name.to_string(),
        kind: TestKind::RowCount,
        dataset: "PROD.RAW.ORDERS".to_string(),
        keys: vec![],
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

#[tokio::test]
async fn cancelling_before_a_run_starts_yields_zero_dispatched_tests() {
    let Some(pool) = pool().await else { return };

    // max_parallel_tests=1 forces strictly sequential dispatch; cancelling
    // up front means the single test in this suite is never even compiled.
    let adapter = ScriptedWarehouseAdapter::new().push_explain(0).push_select(vec![]);
    let warehouse = WarehouseClient::new(adapter, settings());
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
    let bus = ProgressBus::new();
    let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());
    let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);

    let suite = TestSuite {
        name: "orders_suite".to_string(),
        connection: "snowflake_prod".to_string(),
        tests: vec![row_count_test("t1"), row_count_test("t2")],
        tags: vec![],
    };

    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = orchestrator
        .run_suite(
            suite,
            "ci",
            "snowflake_prod",
            RunOptions { max_parallel_tests: 1, ..Default::default() },
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(outcome.run.status, RunStatus::Cancelled);
    assert!(outcome.tests.is_empty());
}

#[tokio::test]
async fn request_cancel_flips_the_token_subscribers_observe_immediately() {
    let Some(pool) = pool().await else { return };

    let adapter = ScriptedWarehouseAdapter::new();
    let warehouse = WarehouseClient::new(adapter, settings());
    let dir = tempfile::tempdir().unwrap();
    let artifacts = ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
    let bus = ProgressBus::new();
    let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());
    let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);

    let cancel = CancelToken::new();
    assert!(!cancel.is_cancelled());
    orchestrator.request_cancel(uuid::Uuid::new_v4(), &cancel).await;
    assert!(cancel.is_cancelled());
}
