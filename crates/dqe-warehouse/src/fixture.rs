//! Deterministic in-memory [`WarehouseAdapter`]: no network, no state. Used
//! in `local` mode and throughout the test suite. Carries no guardrail of
//! its own — [`crate::WarehouseClient`] applies that uniformly in front of
//! every adapter — but it does honor the configured scan budget, the same
//! way a real backend's cost estimator would.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{
    plan_hash, ColumnInfo, ExplainResult, QueryStats, SelectResult, TableStats, WarehouseAdapter,
    WarehouseError,
};

pub struct FixtureWarehouseAdapter {
    warehouse: String,
    role: String,
    database: String,
    schema: String,
}

impl FixtureWarehouseAdapter {
    pub fn new(warehouse: &str, role: &str, database: &str, schema: &str) -> Self {
        Self {
            warehouse: warehouse.to_string(),
            role: role.to_string(),
            database: database.to_string(),
            schema: schema.to_string(),
        }
    }
}

fn deterministic_u64(seed: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().unwrap())
}

#[async_trait]
impl WarehouseAdapter for FixtureWarehouseAdapter {
    async fn raw_test_connection(&self) -> Result<(), WarehouseError> {
        Ok(())
    }

    async fn raw_explain(&self, sql: &str) -> Result<ExplainResult, WarehouseError> {
        let plan_text = format!("FIXTURE PLAN FOR: {sql}");
        let estimated_bytes = deterministic_u64(sql) % 10_000_000;
        Ok(ExplainResult {
            plan_hash: plan_hash(&plan_text),
            plan_text,
            estimated_bytes,
        })
    }

    async fn raw_select(&self, sql: &str) -> Result<SelectResult, WarehouseError> {
        // `sql` already carries its LIMIT clause; derive a bounded,
        // deterministic row count from its text.
        let limit = sql
            .rsplit("LIMIT")
            .next()
            .and_then(|tail| tail.trim().split_whitespace().next())
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(100);

        let row_count = deterministic_u64(sql) % (limit + 1);
        let rows: Vec<Map<String, Value>> = (0..row_count)
            .map(|i| {
                let mut row = Map::new();
                row.insert("row_count".to_string(), Value::from(row_count as i64));
                row.insert("stub_index".to_string(), Value::from(i as i64));
                row
            })
            .collect();

        let bytes_scanned = deterministic_u64(sql) % 5_000_000;

        Ok(SelectResult {
            query_id: format!("fixture-{:016x}", deterministic_u64(sql)),
            rows,
            stats: QueryStats {
                bytes_scanned,
                elapsed_ms: 1,
                rows: row_count,
                warehouse: self.warehouse.clone(),
                role: self.role.clone(),
                database: self.database.clone(),
                schema: self.schema.clone(),
            },
            plan_text: None,
        })
    }

    async fn raw_table_schema(&self, dataset: &str) -> Result<Vec<ColumnInfo>, WarehouseError> {
        let _ = dataset;
        Ok(vec![
            ColumnInfo {
                name: "id".to_string(),
                data_type: "NUMBER".to_string(),
                nullable: false,
            },
            ColumnInfo {
                name: "created_at".to_string(),
                data_type: "TIMESTAMP_NTZ".to_string(),
                nullable: true,
            },
        ])
    }

    async fn raw_table_stats(&self, dataset: &str) -> Result<TableStats, WarehouseError> {
        Ok(TableStats {
            row_count_estimate: Some((deterministic_u64(dataset) % 1_000_000) as i64),
            bytes: Some((deterministic_u64(dataset) % 50_000_000) as i64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuthMethod, ConnectSettings, WarehouseClient};

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

    fn client(settings: ConnectSettings) -> WarehouseClient<FixtureWarehouseAdapter> {
        let adapter = FixtureWarehouseAdapter::new(
            &settings.warehouse,
            &settings.role,
            &settings.database,
            &settings.schema,
        );
        WarehouseClient::new(adapter, settings)
    }

    #[tokio::test]
    async fn explain_is_deterministic_for_same_sql() {
        let client = client(settings());
        let a = client.explain("SELECT 1").await.unwrap();
        let b = client.explain("SELECT 1").await.unwrap();
        assert_eq!(a.plan_hash, b.plan_hash);
        assert_eq!(a.estimated_bytes, b.estimated_bytes);
    }

    #[tokio::test]
    async fn explain_blocks_disallowed_sql_before_touching_budget() {
        let client = client(settings());
        let err = client.explain("DROP TABLE t").await.unwrap_err();
        assert!(matches!(err, WarehouseError::Validation(_)));
    }

    #[tokio::test]
    async fn explain_enforces_preflight_budget() {
        let mut s = settings();
        s.scan_budget_bytes = Some(0);
        let client = client(s);
        let err = client
            .explain("SELECT * FROM PROD.RAW.ORDERS")
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn select_never_fails_on_postflight_budget() {
        let mut s = settings();
        s.scan_budget_bytes = Some(1);
        let client = client(s);
        let result = client.select("SELECT * FROM PROD.RAW.ORDERS", None).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn select_rejects_forbidden_sql_via_guardrail() {
        let client = client(settings());
        let err = client
            .select("SELECT * FROM t; DROP TABLE t", None)
            .await
            .unwrap_err();
        assert!(matches!(err, WarehouseError::Validation(_)));
    }
}
