//! Scenario-test helpers: a scriptable [`WarehouseAdapter`] double, grounded
//! in the teacher's in-crate `AlwaysOkBroker`/`FakeBroker` pattern rather
//! than a mocking framework. Unlike `dqe_warehouse::FixtureWarehouseAdapter`
//! (whose responses are a deterministic hash of the input SQL), every
//! response here is pushed by the test itself, so a scenario can pin down
//! exact row shapes and byte estimates.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use dqe_redact::Row;
use dqe_warehouse::{
    plan_hash, ColumnInfo, ExplainResult, QueryStats, SelectResult, TableStats, WarehouseAdapter,
    WarehouseError,
};

/// One canned response to the next `explain` call.
#[derive(Debug, Clone)]
pub struct ScriptedExplain {
    pub estimated_bytes: u64,
}

/// One canned response to the next `select` call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSelect {
    pub rows: Vec<Row>,
    pub bytes_scanned: u64,
}

/// A scriptable warehouse adapter. Every `push_*` call enqueues one
/// response; every `raw_*` call dequeues the next one (or a harmless
/// zero-row/zero-byte default once the queue runs dry, so a scenario that
/// under-scripts a run still completes instead of panicking).
pub struct ScriptedWarehouseAdapter {
    explains: Mutex<VecDeque<ScriptedExplain>>,
    selects: Mutex<VecDeque<ScriptedSelect>>,
    warehouse: String,
    role: String,
    database: String,
    schema: String,
    calls: Mutex<u64>,
}

impl Default for ScriptedWarehouseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedWarehouseAdapter {
    pub fn new() -> Self {
        Self {
            explains: Mutex::new(VecDeque::new()),
            selects: Mutex::new(VecDeque::new()),
            warehouse: "wh".to_string(),
            role: "analyst".to_string(),
            database: "PROD".to_string(),
            schema: "RAW".to_string(),
            calls: Mutex::new(0),
        }
    }

    pub fn push_explain(self, estimated_bytes: u64) -> Self {
        self.explains.lock().unwrap().push_back(ScriptedExplain { estimated_bytes });
        self
    }

    pub fn push_select(self, rows: Vec<Row>) -> Self {
        self.selects.lock().unwrap().push_back(ScriptedSelect { rows, bytes_scanned: 0 });
        self
    }

    /// Number of `select` calls made so far. Useful for asserting a
    /// cancelled run never reached a later test's `select` call.
    pub fn select_call_count(&self) -> u64 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl WarehouseAdapter for ScriptedWarehouseAdapter {
    async fn raw_test_connection(&self) -> Result<(), WarehouseError> {
        Ok(())
    }

    async fn raw_explain(&self, sql: &str) -> Result<ExplainResult, WarehouseError> {
        let scripted = self.explains.lock().unwrap().pop_front();
        let estimated_bytes = scripted.map(|s| s.estimated_bytes).unwrap_or(0);
        let plan_text = format!("SCRIPTED PLAN FOR: {sql}");
        Ok(ExplainResult {
            plan_hash: plan_hash(&plan_text),
            plan_text,
            estimated_bytes,
        })
    }

    async fn raw_select(&self, _sql: &str) -> Result<SelectResult, WarehouseError> {
        *self.calls.lock().unwrap() += 1;
        let scripted = self.selects.lock().unwrap().pop_front().unwrap_or_default();
        let row_count = scripted.rows.len() as u64;
        Ok(SelectResult {
            query_id: format!("scripted-{row_count}-{}", scripted.bytes_scanned),
            rows: scripted.rows,
            stats: QueryStats {
                bytes_scanned: scripted.bytes_scanned,
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

    async fn raw_table_schema(&self, _dataset: &str) -> Result<Vec<ColumnInfo>, WarehouseError> {
        Ok(vec![ColumnInfo {
            name: "id".to_string(),
            data_type: "NUMBER".to_string(),
            nullable: false,
        }])
    }

    async fn raw_table_stats(&self, _dataset: &str) -> Result<TableStats, WarehouseError> {
        Ok(TableStats::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[tokio::test]
    async fn explains_are_returned_in_push_order() {
        let adapter = ScriptedWarehouseAdapter::new().push_explain(111).push_explain(222);
        let client = WarehouseClient::new(adapter, settings());

        let first = client.explain("SELECT 1").await.unwrap();
        assert_eq!(first.estimated_bytes, 111);
        let second = client.explain("SELECT 2").await.unwrap();
        assert_eq!(second.estimated_bytes, 222);
    }

    #[tokio::test]
    async fn selects_are_returned_in_push_order() {
        let mut row = serde_json::Map::new();
        row.insert("DUPLICATE_COUNT".to_string(), json!(3));
        let adapter = ScriptedWarehouseAdapter::new().push_select(vec![row]);
        let client = WarehouseClient::new(adapter, settings());

        let result = client.select("SELECT * FROM PROD.RAW.ORDERS", None).await.unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["DUPLICATE_COUNT"], json!(3));
    }

    #[tokio::test]
    async fn exhausted_queue_falls_back_to_empty_results() {
        let adapter = ScriptedWarehouseAdapter::new();
        let client = WarehouseClient::new(adapter, settings());

        let result = client.select("SELECT * FROM PROD.RAW.ORDERS", None).await.unwrap();
        assert!(result.rows.is_empty());
    }
}
