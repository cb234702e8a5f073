//! Wiring layer — assembles every component into one long-lived handle and
//! exposes the small set of operations `dqe-cli` and `dqe-testkit` call.
//!
//! Grounded in the teacher's `mqk-daemon::state::AppState`: one struct built
//! once at process start from layered config + resolved secrets, held behind
//! an `Arc` and shared by every caller. The difference is what sits behind
//! it — no HTTP router, no axum state extractor, since the HTTP surface is
//! an explicit non-goal here. `dqe-cli` calls these functions directly in
//! process instead of over a socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dqe_ai::{
    AIProvider, AIProviderRegistry, CompileExpressionRequest, CompileExpressionResponse,
    FallbackAIProvider, StubAIProvider,
};
use dqe_artifacts::{ArtifactWriter, LocalFsArtifactStore};
use dqe_bus::ProgressBus;
use dqe_config::{read_str_at, PolicySettings};
use dqe_orchestrator::{
    CancelToken, Orchestrator, OrchestratorError, RunOptions, RunOutcome, StaticSuiteRegistry,
    SuiteRegistry,
};
use dqe_schemas::{Run, TestSuite};
use dqe_store::StoreError;
use dqe_warehouse::{AuthMethod, ConnectSettings, FixtureWarehouseAdapter, WarehouseClient};
use tracing::info;
use uuid::Uuid;

/// Everything needed to build a [`Runtime`]: which config files to layer,
/// which `settings.*.yaml` mode to resolve secrets for, and where suite
/// definitions and local artifacts live on disk.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub config_paths: Vec<String>,
    pub mode: String,
    pub suites_dir: Option<PathBuf>,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug)]
pub enum RuntimeError {
    Config(anyhow::Error),
    Secrets(anyhow::Error),
    Db(StoreError),
    SuiteLoad { path: PathBuf, detail: String },
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Config(e) => write!(f, "config error: {e}"),
            RuntimeError::Secrets(e) => write!(f, "secrets error: {e}"),
            RuntimeError::Db(e) => write!(f, "database error: {e}"),
            RuntimeError::SuiteLoad { path, detail } => {
                write!(f, "failed to load suite '{}': {detail}", path.display())
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub config_hash: String,
    pub ai_ok: bool,
    pub ai_detail: String,
    pub db_ok: bool,
}

/// Read warehouse connection settings from merged config JSON under
/// `/warehouse/*`, the same pointer convention [`dqe_config::policy`] uses
/// for `/policies/*`. Absent optional fields fall back to the
/// [`ConnectSettings`] defaults a local/dev config would otherwise have to
/// spell out explicitly.
fn connect_settings_from_config(config_json: &serde_json::Value) -> ConnectSettings {
    let auth = match read_str_at(config_json, "/warehouse/auth/method").as_deref() {
        Some("private_key") => AuthMethod::PrivateKey,
        Some("iam") => AuthMethod::Iam,
        Some("oidc") => AuthMethod::Oidc,
        Some("kerberos") => AuthMethod::Kerberos,
        Some("mtls") => AuthMethod::Mtls,
        Some("vault") => AuthMethod::Vault,
        _ => AuthMethod::Password,
    };

    let allowed_schemas = config_json
        .pointer("/warehouse/allowed_schemas")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    ConnectSettings {
        account: read_str_at(config_json, "/warehouse/account").unwrap_or_default(),
        user: read_str_at(config_json, "/warehouse/user").unwrap_or_default(),
        auth,
        role: read_str_at(config_json, "/warehouse/role").unwrap_or_else(|| "analyst".to_string()),
        warehouse: read_str_at(config_json, "/warehouse/warehouse").unwrap_or_default(),
        database: read_str_at(config_json, "/warehouse/database").unwrap_or_default(),
        schema: read_str_at(config_json, "/warehouse/schema").unwrap_or_default(),
        region: read_str_at(config_json, "/warehouse/region"),
        host: read_str_at(config_json, "/warehouse/host"),
        statement_timeout_s: dqe_config::read_i64_at(config_json, "/warehouse/statement_timeout_s", 60)
            .max(0) as u32,
        query_tag: read_str_at(config_json, "/warehouse/query_tag").unwrap_or_else(|| "dqe".to_string()),
        scan_budget_bytes: config_json
            .pointer("/warehouse/scan_budget_bytes")
            .and_then(|v| v.as_u64()),
        sample_limit: dqe_config::read_i64_at(config_json, "/policies/sample_row_limit", 100).max(0) as u32,
        allowed_schemas,
    }
}

/// Build the AI provider stack named by policy: a stub when
/// `external_ai_enabled = false`, otherwise a named primary wrapped in
/// [`FallbackAIProvider`] so a primary outage degrades to the deterministic
/// stub rather than failing the caller outright.
fn build_ai_provider(policy: &PolicySettings, registry: &AIProviderRegistry, primary_name: &str) -> Box<dyn AIProvider> {
    if !policy.external_ai_enabled {
        return Box::new(StubAIProvider::new("disabled"));
    }
    match registry.create(primary_name) {
        Some(primary) => Box::new(FallbackAIProvider::new(primary, Box::new(StubAIProvider::new("fallback")))),
        None => Box::new(StubAIProvider::new("unregistered")),
    }
}

/// Load every `*.yaml`/`*.yml` file directly under `dir` as a [`TestSuite`],
/// keyed by its own `name` field rather than the filename, since suites are
/// addressed by name. One bad file fails the whole load — a suite
/// directory is either entirely usable or the process should not start.
fn load_suite_registry_from_dir(dir: &Path) -> Result<StaticSuiteRegistry, RuntimeError> {
    let mut registry = StaticSuiteRegistry::new();
    let entries = std::fs::read_dir(dir).map_err(|e| RuntimeError::SuiteLoad {
        path: dir.to_path_buf(),
        detail: e.to_string(),
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| RuntimeError::SuiteLoad {
            path: dir.to_path_buf(),
            detail: e.to_string(),
        })?;
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !is_yaml {
            continue;
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| RuntimeError::SuiteLoad {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        let suite: TestSuite = serde_yaml::from_str(&raw).map_err(|e| RuntimeError::SuiteLoad {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        suite.validate_names().map_err(|e| RuntimeError::SuiteLoad {
            path,
            detail: e.to_string(),
        })?;
        registry = registry.with_suite(suite);
    }

    Ok(registry)
}

/// One process-lifetime handle wrapping the Postgres pool, the warehouse
/// client, the artifact writer, the progress bus, the suite registry, and
/// the AI provider stack. `dqe-cli` builds one of these at startup and
/// calls its methods directly; `dqe-testkit` builds its own with a
/// narrower suite registry for scenario tests.
pub struct Runtime {
    orchestrator: Orchestrator<FixtureWarehouseAdapter, LocalFsArtifactStore>,
    ai: Box<dyn AIProvider>,
    pool: sqlx::PgPool,
    config_hash: String,
    policy: PolicySettings,
}

impl Runtime {
    /// Load config, resolve secrets, run migrations, and build every
    /// component. Matches the teacher's `AppState::new()` in shape: one
    /// fallible assembly step, called once, before anything else runs.
    pub async fn init(cfg: RuntimeConfig) -> Result<Self, RuntimeError> {
        let paths: Vec<&str> = cfg.config_paths.iter().map(String::as_str).collect();
        let loaded = dqe_config::load_layered_yaml(&paths).map_err(RuntimeError::Config)?;
        let policy = dqe_config::read_policy_settings(&loaded.config_json);
        let _secrets = dqe_config::resolve_secrets_for_mode(&loaded.config_json, &cfg.mode)
            .map_err(RuntimeError::Secrets)?;

        info!(config_hash = %loaded.config_hash, mode = %cfg.mode, "runtime config loaded");

        let pool = dqe_store::connect_from_env().await.map_err(RuntimeError::Db)?;
        dqe_store::migrate(&pool).await.map_err(RuntimeError::Db)?;

        let connect_settings = connect_settings_from_config(&loaded.config_json);
        let adapter = FixtureWarehouseAdapter::new(
            &connect_settings.warehouse,
            &connect_settings.role,
            &connect_settings.database,
            &connect_settings.schema,
        );
        let warehouse = WarehouseClient::new(adapter, connect_settings);

        let artifacts = ArtifactWriter::new(LocalFsArtifactStore::new(&cfg.artifacts_dir))
            .with_presign_ttl_days(policy.artifact_retention_days);

        let bus = ProgressBus::new();

        let registry: Arc<dyn SuiteRegistry> = match &cfg.suites_dir {
            Some(dir) => Arc::new(load_suite_registry_from_dir(dir)?),
            None => Arc::new(StaticSuiteRegistry::new()),
        };

        let ai_registry = AIProviderRegistry::new();
        let ai = build_ai_provider(&policy, &ai_registry, "primary");

        let orchestrator = Orchestrator::new(pool.clone(), warehouse, artifacts, bus, registry);

        Ok(Self {
            orchestrator,
            ai,
            pool,
            config_hash: loaded.config_hash,
            policy,
        })
    }

    pub fn policy(&self) -> &PolicySettings {
        &self.policy
    }

    /// Combine AI-provider and database reachability into one boolean,
    /// mirroring the teacher's `/v1/health` handler.
    pub async fn health(&self) -> HealthReport {
        let ai_status = self.ai.health().await;
        let db_ok = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();

        HealthReport {
            ok: ai_status.ok && db_ok,
            config_hash: self.config_hash.clone(),
            ai_ok: ai_status.ok,
            ai_detail: ai_status.detail,
            db_ok,
        }
    }

    /// Compile a free-text expression into an [`Ir`](dqe_schemas::Ir) +
    /// SQL preview via the configured AI provider. Whether `sql_preview`
    /// is ever populated in a caller-facing response is a policy decision
    /// (`sql_preview_allowed`) that lives above this layer, in `dqe-cli`.
    pub async fn compile(
        &self,
        req: CompileExpressionRequest,
    ) -> Result<CompileExpressionResponse, dqe_ai::ProviderError> {
        self.ai.compile_expression(req).await
    }

    pub async fn run_suite_by_name(
        &self,
        name: &str,
        environment: &str,
        connection: &str,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.orchestrator
            .run_suite_by_name(name, environment, connection, options, cancel)
            .await
    }

    pub async fn run_suite(
        &self,
        suite: TestSuite,
        environment: &str,
        connection: &str,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.orchestrator.run_suite(suite, environment, connection, options, cancel).await
    }

    pub async fn request_cancel(&self, run_id: Uuid, cancel: &CancelToken) {
        self.orchestrator.request_cancel(run_id, cancel).await;
    }

    pub async fn status(&self, run_id: Uuid) -> Result<Run, StoreError> {
        dqe_store::get_run(&self.pool, run_id).await
    }

    pub async fn list_runs(
        &self,
        suite_name: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Run>, StoreError> {
        dqe_store::list_runs(&self.pool, suite_name, limit, offset).await
    }
}
