//! Guardrail-block and budget-block scenarios, exercised directly against
//! `WarehouseClient` — no database or orchestrator needed since both
//! scenarios are decided before a run would ever touch the store.

use dqe_testkit::ScriptedWarehouseAdapter;
use dqe_warehouse::{AuthMethod, ConnectSettings, WarehouseClient, WarehouseError};

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
async fn multi_statement_sql_is_blocked_before_any_warehouse_call() {
    let adapter = ScriptedWarehouseAdapter::new().push_select(vec![]);
    let client = WarehouseClient::new(adapter, settings());

    let err = client
        .select("SELECT * FROM t; DROP TABLE t", None)
        .await
        .unwrap_err();

    assert!(matches!(err, WarehouseError::Validation(_)));
}

#[tokio::test]
async fn explain_reporting_over_budget_blocks_before_select_is_issued() {
    let mut s = settings();
    s.scan_budget_bytes = Some(1_000_000);
    let adapter = ScriptedWarehouseAdapter::new()
        .push_explain(2_500_000)
        .push_select(vec![]);
    let client = WarehouseClient::new(adapter, s);

    let err = client
        .explain("SELECT * FROM PROD.RAW.ORDERS")
        .await
        .unwrap_err();

    match err {
        WarehouseError::BudgetExceeded { estimated_bytes, budget_bytes } => {
            assert_eq!(estimated_bytes, 2_500_000);
            assert_eq!(budget_bytes, 1_000_000);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
}
