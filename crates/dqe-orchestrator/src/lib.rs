//! Run Orchestrator — drives one suite run end to end: compile, guardrail
//! (inside the warehouse client), execute, evaluate, persist, report
//! (§4.I).
//!
//! Grounded in the teacher's `mqk-execution` task runner: a bounded-
//! concurrency pool (`Semaphore` + `JoinSet`) draining tests in completion
//! order, a cooperative cancellation flag rather than a hard abort, and a
//! typed lifecycle ([`state_machine::RunLifecycle`]) borrowed from the
//! teacher's OMS state machine instead of ad hoc status bookkeeping.

pub mod state_machine;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dqe_artifacts::ArtifactStore;
use dqe_bus::ProgressBus;
use dqe_evaluator::EvalOutcome;
use dqe_schemas::{
    ProgressEventType, Run, RunStatus, RunTest, RunTestStatus, TestDefinition, TestKind, TestSuite,
};
use dqe_store::StoreError;
use dqe_warehouse::{WarehouseAdapter, WarehouseClient, WarehouseError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use state_machine::{RunEvent, RunLifecycle};

/// Error kinds named in §7, used both for per-test classification and for
/// the run-level failure recorded on `runs.error_message`.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    SuiteNotFound,
    CompileError,
    GuardrailViolation,
    AuthFailure,
    Timeout,
    BudgetExceeded,
    UpstreamError,
    StoreError,
    ArtifactError,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug)]
pub enum OrchestratorError {
    SuiteNotFound(String),
    InvalidSuite(String),
    Store(StoreError),
    Transition(state_machine::TransitionError),
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorError::SuiteNotFound(name) => write!(f, "suite not found: {name}"),
            OrchestratorError::InvalidSuite(detail) => write!(f, "invalid suite: {detail}"),
            OrchestratorError::Store(e) => write!(f, "store error: {e}"),
            OrchestratorError::Transition(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<StoreError> for OrchestratorError {
    fn from(e: StoreError) -> Self {
        OrchestratorError::Store(e)
    }
}

/// Where suite definitions come from. Kept as a trait so the CLI's file-
/// backed registry and a future catalog-backed one share this call site
/// (§6: suites are loaded by name, not embedded in run options).
pub trait SuiteRegistry: Send + Sync {
    fn find(&self, name: &str) -> Option<TestSuite>;
}

/// In-memory registry, primarily for tests and `dqe-cli`'s `--file` mode.
#[derive(Default)]
pub struct StaticSuiteRegistry {
    suites: HashMap<String, TestSuite>,
}

impl StaticSuiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suite(mut self, suite: TestSuite) -> Self {
        self.suites.insert(suite.name.clone(), suite);
        self
    }
}

impl SuiteRegistry for StaticSuiteRegistry {
    fn find(&self, name: &str) -> Option<TestSuite> {
        self.suites.get(name).cloned()
    }
}

/// Cooperative stop signal (§5 Cancellation semantics): checked between
/// tests, never used to kill an in-flight warehouse call. One token is
/// shared by explicit user cancellation and by a mid-run store failure,
/// since both mean the same thing to the scheduler — stop starting new
/// work, let what's in flight finish.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Compile and guardrail-validate every test but never call the
    /// warehouse (§5 Dry run semantics).
    pub dry_run: bool,
    /// Soft wall-clock deadline. Checked between test dispatches, not
    /// enforced as a hard per-query timeout.
    pub budget_seconds: Option<u64>,
    pub max_parallel_tests: usize,
    pub sample_limit: Option<u32>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            budget_seconds: None,
            max_parallel_tests: 1,
            sample_limit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: Run,
    pub tests: Vec<RunTest>,
}

fn test_kind_str(kind: TestKind) -> &'static str {
    match kind {
        TestKind::Uniqueness => "uniqueness",
        TestKind::NotNull => "not_null",
        TestKind::RowCount => "row_count",
        TestKind::Freshness => "freshness",
        TestKind::Rule => "rule",
        TestKind::Schema => "schema",
        TestKind::Reconciliation => "reconciliation",
        TestKind::Drift => "drift",
        TestKind::JsonPathExists => "json_path_exists",
        TestKind::JsonArrayFlatten => "json_array_flatten",
        TestKind::JsonTypeCheck => "json_type_check",
        TestKind::JsonUniqueness => "json_uniqueness",
        TestKind::JsonMappingEquivalence => "json_mapping_equivalence",
    }
}

/// Maps a warehouse-layer failure to the named error kinds in §7. Compiler
/// failures are classified separately, at the call site that produces them.
fn classify_warehouse_error(e: &WarehouseError) -> ErrorKind {
    match e {
        WarehouseError::Validation(_) => ErrorKind::GuardrailViolation,
        WarehouseError::Auth(_) => ErrorKind::AuthFailure,
        WarehouseError::Connection(_) => ErrorKind::UpstreamError,
        WarehouseError::Timeout => ErrorKind::Timeout,
        WarehouseError::BudgetExceeded { .. } => ErrorKind::BudgetExceeded,
        WarehouseError::Upstream(_) => ErrorKind::UpstreamError,
    }
}

fn error_run_test(test: &TestDefinition, kind: ErrorKind, detail: String) -> RunTest {
    let now = Utc::now();
    RunTest {
        id: Uuid::new_v4(),
        run_id: Uuid::nil(), // overwritten by the caller, which knows the run id
        name: test.name.clone(),
        kind: test_kind_str(test.kind).to_string(),
        status: RunTestStatus::Error,
        started_at: now,
        finished_at: now,
        duration_ms: 0,
        observed: serde_json::json!({ "error_kind": kind.to_string() }),
        expected: serde_json::json!({}),
        query_id: None,
        error_message: Some(detail),
    }
}

/// Run exactly one test against `adapter`, from compile through evaluate.
/// Every failure along the way — compile, guardrail, warehouse — is
/// absorbed into an `Error`-status [`RunTest`] rather than propagated; the
/// suite always continues to the next test (§7 propagation policy).
async fn execute_one_test<A: WarehouseAdapter>(
    test: TestDefinition,
    warehouse: Arc<WarehouseClient<A>>,
    sample_limit: Option<u32>,
    dry_run: bool,
) -> RunTest {
    let started_at = Utc::now();

    let compiled = dqe_compiler::compile_template(&test);

    if dry_run {
        return RunTest {
            id: Uuid::new_v4(),
            run_id: Uuid::nil(),
            name: test.name.clone(),
            kind: test_kind_str(test.kind).to_string(),
            status: RunTestStatus::Skip,
            started_at,
            finished_at: Utc::now(),
            duration_ms: 0,
            observed: serde_json::json!({ "dry_run": true, "compiled_sql": compiled.query.sql }),
            expected: compiled.query.expected.clone(),
            query_id: None,
            error_message: None,
        };
    }

    // Step 3b: explain first so a budget breach is caught before any rows
    // are ever fetched (§4.I step 3b — "on budget failure, record test as
    // error with ErrorKind.BudgetExceeded", no select issued).
    if let Err(e) = warehouse.explain(&compiled.query.sql).await {
        let mut rt = error_run_test(&test, classify_warehouse_error(&e), e.to_string());
        rt.started_at = started_at;
        return rt;
    }

    let select = match warehouse.select(&compiled.query.sql, sample_limit).await {
        Ok(r) => r,
        Err(e) => {
            let mut rt = error_run_test(&test, classify_warehouse_error(&e), e.to_string());
            rt.started_at = started_at;
            return rt;
        }
    };

    let EvalOutcome {
        status,
        observed,
        violations: _,
        error_message,
    } = dqe_evaluator::evaluate(&test, &select.rows, &select.stats);

    RunTest {
        id: Uuid::new_v4(),
        run_id: Uuid::nil(),
        name: test.name.clone(),
        kind: test_kind_str(test.kind).to_string(),
        status,
        started_at,
        finished_at: Utc::now(),
        duration_ms: (Utc::now() - started_at).num_milliseconds().max(0),
        observed,
        expected: compiled.query.expected,
        query_id: Some(select.query_id),
        error_message,
    }
}

/// Ties every component together for one suite run. Generic over the
/// warehouse adapter and the artifact backend, like the components it
/// wraps.
pub struct Orchestrator<A: WarehouseAdapter, S: ArtifactStore> {
    pool: sqlx::PgPool,
    warehouse: Arc<WarehouseClient<A>>,
    artifacts: dqe_artifacts::ArtifactWriter<S>,
    bus: ProgressBus,
    registry: Arc<dyn SuiteRegistry>,
}

impl<A: WarehouseAdapter + 'static, S: ArtifactStore + 'static> Orchestrator<A, S> {
    pub fn new(
        pool: sqlx::PgPool,
        warehouse: WarehouseClient<A>,
        artifacts: dqe_artifacts::ArtifactWriter<S>,
        bus: ProgressBus,
        registry: Arc<dyn SuiteRegistry>,
    ) -> Self {
        Self {
            pool,
            warehouse: Arc::new(warehouse),
            artifacts,
            bus,
            registry,
        }
    }

    /// Request cancellation of an in-flight run (§4.I / §5). Flips `cancel`
    /// immediately and publishes `run_status: cancelled` on the bus before
    /// the scheduler itself has observed the flag — a subscriber sees the
    /// decision the instant it is made, not only once `run_suite` finishes
    /// draining whatever was already in flight.
    pub async fn request_cancel(&self, run_id: Uuid, cancel: &CancelToken) {
        cancel.cancel();
        self.bus
            .publish_kind(
                run_id,
                ProgressEventType::RunStatus,
                serde_json::json!({ "status": "cancelled" }),
            )
            .await;
    }

    pub async fn run_suite_by_name(
        &self,
        name: &str,
        environment: &str,
        connection: &str,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let suite = self
            .registry
            .find(name)
            .ok_or_else(|| OrchestratorError::SuiteNotFound(name.to_string()))?;
        self.run_suite(suite, environment, connection, options, cancel).await
    }

    /// The 5-step suite execution algorithm (§4.I): begin the run, dispatch
    /// every test under bounded concurrency, finalize, write artifacts.
    pub async fn run_suite(
        &self,
        suite: TestSuite,
        environment: &str,
        connection: &str,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        suite
            .validate_names()
            .map_err(|e| OrchestratorError::InvalidSuite(e.to_string()))?;

        let run = dqe_store::begin_run(&self.pool, &suite.name, environment, connection).await?;
        let mut lifecycle = RunLifecycle::new();
        lifecycle
            .apply(&RunEvent::Start, Some(&format!("{}-start", run.id)))
            .map_err(OrchestratorError::Transition)?;

        self.bus
            .publish_kind(
                run.id,
                ProgressEventType::RunState,
                serde_json::json!({ "status": "running" }),
            )
            .await;
        let heartbeat = self.bus.spawn_heartbeat(run.id);

        let deadline = options
            .budget_seconds
            .map(|s| tokio::time::Instant::now() + std::time::Duration::from_secs(s));

        let max_parallel = options.max_parallel_tests.max(1);
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut join_set: JoinSet<RunTest> = JoinSet::new();
        let mut budget_exceeded = false;
        let mut store_failed: Option<StoreError> = None;
        let mut tests = Vec::with_capacity(suite.tests.len());

        for test in suite.tests.into_iter() {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(deadline) = deadline {
                if tokio::time::Instant::now() >= deadline {
                    budget_exceeded = true;
                    break;
                }
            }

            let permit = Arc::clone(&semaphore);
            let warehouse = Arc::clone(&self.warehouse);
            let sample_limit = options.sample_limit;
            let dry_run = options.dry_run;

            join_set.spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore not closed");
                execute_one_test(test, warehouse, sample_limit, dry_run).await
            });
        }

        // RunTest append order is completion order, not submission order,
        // when tests run concurrently (§5 ordering guarantee ii) — draining
        // a JoinSet gives us exactly that for free.
        while let Some(joined) = join_set.join_next().await {
            let mut run_test = match joined {
                Ok(rt) => rt,
                Err(e) => {
                    // A panicking test task is itself an error-status result,
                    // not a run-level failure.
                    tracing::error!(run_id = %run.id, error = %e, "test task panicked");
                    continue;
                }
            };
            run_test.run_id = run.id;

            self.bus
                .publish_kind(
                    run.id,
                    ProgressEventType::TestResult,
                    serde_json::json!({
                        "name": run_test.name,
                        "status": format!("{:?}", run_test.status).to_lowercase(),
                    }),
                )
                .await;

            if let Err(e) = dqe_store::append_test(&self.pool, &run_test).await {
                tracing::error!(run_id = %run.id, test = %run_test.name, error = %e, "failed to persist test result; run will be marked failed");
                store_failed = Some(e);
                cancel.cancel();
            }

            if run_test.status == RunTestStatus::Fail && run_test.observed.get("sample").is_some() {
                self.artifacts
                    .write_samples(run.id, run.started_at, &run_test.name, &run_test.observed["sample"])
                    .await;
            }

            tests.push(run_test);
        }

        heartbeat.abort();

        let finished_at = Utc::now();
        let duration_ms = (finished_at - run.started_at).num_milliseconds().max(0);
        let query_ids: Vec<String> = tests.iter().filter_map(|t| t.query_id.clone()).collect();
        let bytes_scanned = None; // per-test bytes aren't summed here; warehouse stats are advisory (§4.E)

        let (final_status, error_message, event) = if let Some(e) = &store_failed {
            (RunStatus::Failed, Some(e.to_string()), RunEvent::Fail { reason: e.to_string() })
        } else if cancel.is_cancelled() {
            (RunStatus::Cancelled, None, RunEvent::Cancel)
        } else {
            // A budget-exceeded suite still completes: the tests that ran
            // are real results, not a failure of the run itself (§9 Open
            // Question decision).
            let note = budget_exceeded.then(|| "run halted early: wall-clock budget exceeded".to_string());
            (RunStatus::Completed, note, RunEvent::Complete)
        };

        let run_id = run.id;

        lifecycle
            .apply(&event, Some(&format!("{run_id}-end")))
            .map_err(OrchestratorError::Transition)?;

        dqe_store::finalize_run(
            &self.pool,
            run_id,
            final_status,
            finished_at,
            duration_ms,
            &query_ids,
            bytes_scanned,
            error_message.as_deref(),
        )
        .await?;

        let finalized_run = Run {
            status: final_status,
            finished_at: Some(finished_at),
            duration_ms: Some(duration_ms),
            bytes_scanned,
            query_ids,
            error_message,
            ..run
        };

        self.artifacts.write_report(&finalized_run, &tests).await;

        self.bus
            .publish_kind(
                run_id,
                ProgressEventType::RunCompleted,
                serde_json::json!({ "status": format!("{:?}", final_status).to_lowercase() }),
            )
            .await;
        self.bus.close(run_id).await;

        Ok(RunOutcome {
            run: finalized_run,
            tests,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dqe_artifacts::LocalFsArtifactStore;
    use dqe_schemas::{Gate, ProgressEvent, Severity};
    use dqe_warehouse::{AuthMethod, ConnectSettings, FixtureWarehouseAdapter};

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
    async fn dry_run_compiles_every_test_without_calling_the_warehouse() {
        let Some(pool) = pool().await else { return };

        let adapter = FixtureWarehouseAdapter::new("wh", "analyst", "PROD", "RAW");
        let warehouse = WarehouseClient::new(adapter, settings());
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dqe_artifacts::ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
        let bus = ProgressBus::new();
        let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());

        let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);
        let suite = TestSuite {
            name: "orders_suite".to_string(),
            connection: "snowflake_prod".to_string(),
            tests: vec![row_count_test("t1"), row_count_test("t2")],
            tags: vec![],
        };

        let outcome = orchestrator
            .run_suite(
                suite,
                "ci",
                "snowflake_prod",
                RunOptions {
                    dry_run: true,
                    ..Default::default()
                },
                CancelToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.tests.len(), 2);
        assert!(outcome.tests.iter().all(|t| t.status == RunTestStatus::Skip));
        assert_eq!(outcome.run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn empty_suite_completes_with_zero_tests() {
        let Some(pool) = pool().await else { return };

        let adapter = FixtureWarehouseAdapter::new("wh", "analyst", "PROD", "RAW");
        let warehouse = WarehouseClient::new(adapter, settings());
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dqe_artifacts::ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
        let bus = ProgressBus::new();
        let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());

        let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);
        let suite = TestSuite {
            name: "empty_suite".to_string(),
            connection: "snowflake_prod".to_string(),
            tests: vec![],
            tags: vec![],
        };

        let outcome = orchestrator
            .run_suite(suite, "ci", "snowflake_prod", RunOptions::default(), CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.tests.is_empty());
        assert_eq!(outcome.run.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn cancelling_before_dispatch_yields_a_cancelled_run() {
        let Some(pool) = pool().await else { return };

        let adapter = FixtureWarehouseAdapter::new("wh", "analyst", "PROD", "RAW");
        let warehouse = WarehouseClient::new(adapter, settings());
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dqe_artifacts::ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
        let bus = ProgressBus::new();
        let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());

        let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);
        let suite = TestSuite {
            name: "orders_suite".to_string(),
            connection: "snowflake_prod".to_string(),
            tests: vec![row_count_test("t1")],
            tags: vec![],
        };

        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = orchestrator
            .run_suite(suite, "ci", "snowflake_prod", RunOptions::default(), cancel)
            .await
            .unwrap();

        assert!(outcome.tests.is_empty());
        assert_eq!(outcome.run.status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn request_cancel_publishes_immediately_and_sets_the_token() {
        let Some(pool) = pool().await else { return };

        let adapter = FixtureWarehouseAdapter::new("wh", "analyst", "PROD", "RAW");
        let warehouse = WarehouseClient::new(adapter, settings());
        let dir = tempfile::tempdir().unwrap();
        let artifacts = dqe_artifacts::ArtifactWriter::new(LocalFsArtifactStore::new(dir.path()));
        let bus = ProgressBus::new();
        let registry: Arc<dyn SuiteRegistry> = Arc::new(StaticSuiteRegistry::new());

        let orchestrator = Orchestrator::new(pool, warehouse, artifacts, bus, registry);
        let run_id = Uuid::new_v4();
        let snapshot = ProgressEvent {
            run_id,
            event_type: ProgressEventType::RunState,
            timestamp: Utc::now(),
            payload: serde_json::json!({"status": "running"}),
        };
        let mut events = orchestrator.bus.subscribe(run_id, snapshot).await;

        let cancel = CancelToken::new();
        orchestrator.request_cancel(run_id, &cancel).await;

        assert!(cancel.is_cancelled());

        use futures_util::StreamExt;
        let snapshot = events.next().await.unwrap();
        assert_eq!(snapshot.event_type, ProgressEventType::RunState);
        let cancelled = events.next().await.unwrap();
        assert_eq!(cancelled.event_type, ProgressEventType::RunStatus);
        assert_eq!(cancelled.payload["status"], "cancelled");
    }

    #[test]
    fn classify_warehouse_error_maps_every_variant() {
        assert_eq!(
            classify_warehouse_error(&WarehouseError::Validation("x".into())),
            ErrorKind::GuardrailViolation
        );
        assert_eq!(classify_warehouse_error(&WarehouseError::Auth("x".into())), ErrorKind::AuthFailure);
        assert_eq!(classify_warehouse_error(&WarehouseError::Timeout), ErrorKind::Timeout);
        assert_eq!(
            classify_warehouse_error(&WarehouseError::BudgetExceeded {
                estimated_bytes: 10,
                budget_bytes: 5
            }),
            ErrorKind::BudgetExceeded
        );
    }
}
