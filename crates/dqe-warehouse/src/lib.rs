//! Warehouse Client — the only component that actually talks to the
//! analytical database, and only ever through [`dqe_guardrail::Guardrail`].
//!
//! The client is generic over a [`WarehouseAdapter`]: the adapter is a bare
//! transport (raw `explain`/`select`/schema lookups, no policy), and
//! [`WarehouseClient<A>`] is the single choke-point that runs the guardrail,
//! applies limit/budget/redaction policy, and only then calls the adapter.
//! Nothing outside this module can reach `A` directly — there is no second
//! path that skips the gate.
//!
//! The only adapter shipped in this repository is [`FixtureWarehouseAdapter`],
//! a deterministic in-memory implementation used for local development and
//! tests. A real Snowflake (or other warehouse) adapter is an external
//! integration, out of scope here — the trait is the full contract a real
//! one would need to satisfy.

mod fixture;

use std::collections::HashMap;

use async_trait::async_trait;
use dqe_guardrail::{Guardrail, GuardrailError};
use dqe_redact::Row;
use serde::{Deserialize, Serialize};

pub use fixture::FixtureWarehouseAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    PrivateKey,
    Iam,
    Oidc,
    Kerberos,
    Mtls,
    Vault,
}

#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub account: String,
    pub user: String,
    pub auth: AuthMethod,
    pub role: String,
    pub warehouse: String,
    pub database: String,
    pub schema: String,
    pub region: Option<String>,
    pub host: Option<String>,
    pub statement_timeout_s: u32,
    pub query_tag: String,
    pub scan_budget_bytes: Option<u64>,
    pub sample_limit: u32,
    pub allowed_schemas: Vec<String>,
}

impl ConnectSettings {
    pub fn guardrail(&self) -> Guardrail {
        if self.allowed_schemas.is_empty() {
            Guardrail::new()
        } else {
            Guardrail::with_allowed_schemas(self.allowed_schemas.clone())
        }
    }
}

/// Typed failure model (§4.E). Connection failures are never retried here —
/// retry policy, if any, lives in the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseError {
    Validation(String),
    Auth(String),
    Connection(String),
    Timeout,
    BudgetExceeded { estimated_bytes: u64, budget_bytes: u64 },
    Upstream(String),
}

impl From<GuardrailError> for WarehouseError {
    fn from(e: GuardrailError) -> Self {
        WarehouseError::Validation(e.to_string())
    }
}

impl std::fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarehouseError::Validation(d) => write!(f, "VALIDATION: {d}"),
            WarehouseError::Auth(d) => write!(f, "AUTH: {d}"),
            WarehouseError::Connection(d) => write!(f, "CONNECTION: {d}"),
            WarehouseError::Timeout => write!(f, "TIMEOUT"),
            WarehouseError::BudgetExceeded {
                estimated_bytes,
                budget_bytes,
            } => write!(
                f,
                "BUDGET_EXCEEDED: estimated {estimated_bytes} bytes > budget {budget_bytes} bytes"
            ),
            WarehouseError::Upstream(d) => write!(f, "UPSTREAM: {d}"),
        }
    }
}

impl std::error::Error for WarehouseError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainResult {
    pub plan_text: String,
    pub plan_hash: String,
    pub estimated_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStats {
    pub bytes_scanned: u64,
    pub elapsed_ms: u64,
    pub rows: u64,
    pub warehouse: String,
    pub role: String,
    pub database: String,
    pub schema: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectResult {
    pub query_id: String,
    pub rows: Vec<Row>,
    pub stats: QueryStats,
    pub plan_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub row_count_estimate: Option<i64>,
    pub bytes: Option<i64>,
}

/// Bare transport contract a warehouse backend must satisfy. No policy
/// lives here: no guardrail check, no limit injection, no redaction, no
/// budget enforcement — all of that is [`WarehouseClient`]'s job, applied
/// uniformly in front of every adapter.
#[async_trait]
pub trait WarehouseAdapter: Send + Sync {
    async fn raw_test_connection(&self) -> Result<(), WarehouseError>;

    /// Run `EXPLAIN USING TEXT <sql>` (or equivalent) on `sql`, which has
    /// already passed guardrail validation.
    async fn raw_explain(&self, sql: &str) -> Result<ExplainResult, WarehouseError>;

    /// Execute `sql`, which the caller has already guardrail-validated and
    /// limit-bounded. Returned rows are not yet redacted.
    async fn raw_select(&self, sql: &str) -> Result<SelectResult, WarehouseError>;

    async fn raw_table_schema(&self, dataset: &str) -> Result<Vec<ColumnInfo>, WarehouseError>;

    async fn raw_table_stats(&self, dataset: &str) -> Result<TableStats, WarehouseError>;
}

/// The read-only warehouse client. Generic over the adapter so the same
/// guardrail/budget/redaction policy wraps whatever backend is plugged in;
/// callers never see `A` and cannot bypass this wrapper to reach it.
pub struct WarehouseClient<A: WarehouseAdapter> {
    adapter: A,
    guardrail: Guardrail,
    settings: ConnectSettings,
}

impl<A: WarehouseAdapter> WarehouseClient<A> {
    pub fn new(adapter: A, settings: ConnectSettings) -> Self {
        Self {
            guardrail: settings.guardrail(),
            adapter,
            settings,
        }
    }

    pub async fn test_connection(&self) -> Result<(), WarehouseError> {
        self.adapter.raw_test_connection().await
    }

    /// Runs `EXPLAIN USING TEXT <sql>` after guardrail validation.
    /// Enforces the pre-flight scan budget:
    /// `estimated_bytes > budget ⇒ BudgetExceeded`.
    pub async fn explain(&self, sql: &str) -> Result<ExplainResult, WarehouseError> {
        self.guardrail.validate(sql)?;
        let explain_sql = format!("EXPLAIN USING TEXT {sql}");
        self.guardrail.validate(&explain_sql)?;

        let result = self.adapter.raw_explain(sql).await?;

        if let Some(budget) = self.settings.scan_budget_bytes {
            if result.estimated_bytes > budget {
                return Err(WarehouseError::BudgetExceeded {
                    estimated_bytes: result.estimated_bytes,
                    budget_bytes: budget,
                });
            }
        }

        Ok(result)
    }

    /// Guardrail-validates, appends `LIMIT min(limit, sample_limit)` when
    /// the statement lacks one, executes, PII-redacts rows, and attaches
    /// best-effort query-history stats. Post-flight budget overruns are
    /// logged as a warning, never a failure (§4.E rationale).
    pub async fn select(&self, sql: &str, limit: Option<u32>) -> Result<SelectResult, WarehouseError> {
        self.guardrail.validate(sql)?;
        let n = effective_limit(limit, self.settings.sample_limit);
        let bounded_sql = ensure_limit(sql, n);
        self.guardrail.validate(&bounded_sql)?;

        let mut result = self.adapter.raw_select(&bounded_sql).await?;
        result.rows = dqe_redact::redact_rows(&result.rows);

        if let Some(budget) = self.settings.scan_budget_bytes {
            if result.stats.bytes_scanned > budget {
                tracing::warn!(
                    bytes_scanned = result.stats.bytes_scanned,
                    budget,
                    "post-flight scan budget exceeded; run continues (warning only)"
                );
            }
        }

        Ok(result)
    }

    pub async fn get_table_schema(&self, dataset: &str) -> Result<Vec<ColumnInfo>, WarehouseError> {
        self.adapter.raw_table_schema(dataset).await
    }

    pub async fn get_table_stats(&self, dataset: &str) -> Result<TableStats, WarehouseError> {
        self.adapter.raw_table_stats(dataset).await
    }
}

/// `sha256(plan_text)` truncated to its first 16 hex characters (§4.E).
pub fn plan_hash(plan_text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(plan_text.as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..16].to_string()
}

/// Append `LIMIT <n>` to `sql` when it has none — purely textual, only
/// ever applied to SQL that has already passed the guardrail.
pub fn ensure_limit(sql: &str, limit: u32) -> String {
    let upper = sql.to_ascii_uppercase();
    if upper.contains("LIMIT") {
        sql.to_string()
    } else {
        format!("{sql} LIMIT {limit}")
    }
}

pub fn effective_limit(requested: Option<u32>, sample_limit: u32) -> u32 {
    match requested {
        Some(r) => r.min(sample_limit),
        None => sample_limit,
    }
}

/// Table-name to PII-column map used by [`dqe_redact::validate_query_for_pii`]
/// call sites that need to build it from [`ColumnInfo`] lookups.
pub fn pii_columns_map(dataset: &str, columns: &[ColumnInfo]) -> HashMap<String, Vec<String>> {
    let mut map = HashMap::new();
    map.insert(
        dataset.to_string(),
        columns.iter().map(|c| c.name.clone()).collect(),
    );
    map
}

/// Auth methods the contract enumerates; credential *resolution* is the
/// config layer's job (`dqe_config::secrets`) — a real adapter only ever
/// receives the already-resolved bearer token or key material.
pub fn supported_auth_methods() -> &'static [AuthMethod] {
    &[
        AuthMethod::Password,
        AuthMethod::PrivateKey,
        AuthMethod::Iam,
        AuthMethod::Oidc,
        AuthMethod::Kerberos,
        AuthMethod::Mtls,
        AuthMethod::Vault,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_hash_is_16_hex_chars() {
        let h = plan_hash("SEQ 0001 SCAN TABLE");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ensure_limit_only_appends_when_absent() {
        assert_eq!(ensure_limit("SELECT 1", 100), "SELECT 1 LIMIT 100");
        assert_eq!(
            ensure_limit("SELECT 1 LIMIT 5", 100),
            "SELECT 1 LIMIT 5"
        );
    }

    #[test]
    fn effective_limit_caps_at_sample_limit() {
        assert_eq!(effective_limit(Some(500), 100), 100);
        assert_eq!(effective_limit(Some(10), 100), 10);
        assert_eq!(effective_limit(None, 100), 100);
    }
}
