//! Evaluator — the pure function that turns warehouse rows into a pass,
//! fail, error or skip verdict per test kind (§4.F). Nothing here touches
//! the network or the clock: same `(TestDefinition, rows, stats)` in,
//! same `EvalOutcome` out.
//!
//! Column names read from `rows` match the compiler's templates exactly
//! (`ROW_COUNT`, `NULL_COUNT`, `DUPLICATE_COUNT`, …) — the evaluator and the
//! SQL generator agree on a shape without a third, shared IR for it.

use dqe_redact::Row;
use dqe_schemas::{RunTestStatus, TestDefinition, TestKind, Tolerance, Window};
use dqe_warehouse::QueryStats;
use serde_json::{json, Value};

/// Observed/sample rows are capped at this many entries; the rest is the
/// artifact writer's job to persist under `samples/<test>.json` (§4.F).
const MAX_OBSERVED_SAMPLES: usize = 100;

#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub status: RunTestStatus,
    pub observed: Value,
    pub violations: Option<i64>,
    pub error_message: Option<String>,
}

impl EvalOutcome {
    fn pass(observed: Value) -> Self {
        Self {
            status: RunTestStatus::Pass,
            observed,
            violations: None,
            error_message: None,
        }
    }

    fn fail(observed: Value, violations: Option<i64>) -> Self {
        Self {
            status: RunTestStatus::Fail,
            observed,
            violations,
            error_message: None,
        }
    }

    fn warn_as_pass(observed: Value) -> Self {
        // `reconciliation`/`drift` never produce a hard failure unless the
        // test opts into `gate=fail` (§4.F, §9 Open Questions); the warning
        // itself rides in `observed.status`.
        Self {
            status: RunTestStatus::Pass,
            observed,
            violations: None,
            error_message: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            status: RunTestStatus::Error,
            observed: json!({ "error": message.into() }),
            violations: None,
            error_message: None,
        }
    }
}

fn first_i64(rows: &[Row], column: &str) -> Option<i64> {
    rows.first().and_then(|r| r.get(column)).and_then(value_as_i64)
}

fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn sample(rows: &[Row]) -> Value {
    json!(rows.iter().take(MAX_OBSERVED_SAMPLES).collect::<Vec<_>>())
}

/// `min=N` / `max=N` / `min=N,max=N` parsed from a `row_count` test's free
/// text `expression`, mirroring the compiler's own parse so the evaluator
/// judges the same bounds that were compiled into the SQL.
fn parse_row_count_bounds(expression: Option<&str>) -> (i64, Option<i64>) {
    let Some(expr) = expression else {
        return (0, None);
    };
    let mut min_rows = 0;
    let mut max_rows = None;
    for part in expr.split(',') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("min=") {
            min_rows = v.trim().parse().unwrap_or(0);
        } else if let Some(v) = part.strip_prefix("max=") {
            max_rows = v.trim().parse().ok();
        }
    }
    (min_rows, max_rows)
}

fn tolerance_dup_rows(tolerance: &Option<Tolerance>) -> i64 {
    match tolerance {
        Some(Tolerance::DupRows { count }) => *count,
        _ => 0,
    }
}

fn window_last_hours(window: &Option<Window>) -> Option<f64> {
    match window {
        Some(Window::LastHours { hours }) => Some(*hours as f64),
        Some(Window::LastDays { days }) => Some(*days as f64 * 24.0),
        _ => None,
    }
}

/// Evaluate one test's result rows against its definition. Pure: identical
/// `(test, rows, stats)` always yields an identical [`EvalOutcome`].
pub fn evaluate(test: &TestDefinition, rows: &[Row], stats: &QueryStats) -> EvalOutcome {
    match test.kind {
        TestKind::RowCount => evaluate_row_count(test, rows),
        TestKind::Schema => evaluate_schema(test, rows),
        TestKind::NotNull => evaluate_not_null(rows),
        TestKind::Uniqueness => evaluate_uniqueness(test, rows),
        TestKind::Freshness => evaluate_freshness(test, rows),
        TestKind::Rule => evaluate_rule(test, rows),
        TestKind::Reconciliation => evaluate_reconciliation(rows),
        TestKind::Drift => evaluate_drift(rows),
        TestKind::JsonPathExists => evaluate_json_path_exists(rows),
        TestKind::JsonArrayFlatten => evaluate_json_array_flatten(rows),
        TestKind::JsonTypeCheck => evaluate_json_type_check(rows),
        TestKind::JsonUniqueness => evaluate_json_uniqueness(rows),
        TestKind::JsonMappingEquivalence => evaluate_json_mapping_equivalence(rows),
    }
    .tag_query_rows(stats)
}

/// Trivial trait-less extension point: every evaluation already carries its
/// own `observed`; `stats.rows` is folded in uniformly here so each kind's
/// function above doesn't have to thread it through by hand.
trait TagRows {
    fn tag_query_rows(self, stats: &QueryStats) -> Self;
}

impl TagRows for EvalOutcome {
    fn tag_query_rows(mut self, stats: &QueryStats) -> Self {
        if let Value::Object(ref mut map) = self.observed {
            map.insert("rows_returned".to_string(), json!(stats.rows));
        }
        self
    }
}

fn evaluate_row_count(test: &TestDefinition, rows: &[Row]) -> EvalOutcome {
    let (min_rows, max_rows) = parse_row_count_bounds(test.expression.as_deref());
    let row_count = first_i64(rows, "ROW_COUNT").unwrap_or(0);

    let observed = json!({ "row_count": row_count, "min_rows": min_rows, "max_rows": max_rows });

    let below_min = row_count < min_rows;
    let above_max = max_rows.map(|m| row_count > m).unwrap_or(false);

    if below_min || above_max {
        EvalOutcome::fail(observed, None)
    } else {
        EvalOutcome::pass(observed)
    }
}

fn evaluate_schema(test: &TestDefinition, rows: &[Row]) -> EvalOutcome {
    let observed_columns: Vec<String> = rows
        .iter()
        .filter_map(|r| r.get("COLUMN_NAME").and_then(|v| v.as_str()).map(str::to_ascii_uppercase))
        .collect();

    let missing: Vec<&String> = test
        .keys
        .iter()
        .filter(|expected| !observed_columns.contains(&expected.to_ascii_uppercase()))
        .collect();

    let observed = json!({ "columns": observed_columns, "expected_columns": test.keys });

    if missing.is_empty() {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(missing.len() as i64))
    }
}

fn evaluate_not_null(rows: &[Row]) -> EvalOutcome {
    let expected_nulls = 0i64;
    let null_count = first_i64(rows, "NULL_COUNT").unwrap_or(0);
    let observed = json!({ "null_count": null_count, "expected_nulls": expected_nulls });

    if null_count != expected_nulls {
        EvalOutcome::fail(observed, Some(null_count))
    } else {
        EvalOutcome::pass(observed)
    }
}

fn evaluate_uniqueness(test: &TestDefinition, rows: &[Row]) -> EvalOutcome {
    let violations = rows.len() as i64;
    let tolerance = tolerance_dup_rows(&test.tolerance);
    let observed = json!({
        "duplicate_groups": violations,
        "tolerance_dup_rows": tolerance,
        "sample": sample(rows),
    });

    if violations <= tolerance {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(violations))
    }
}

fn evaluate_freshness(test: &TestDefinition, rows: &[Row]) -> EvalOutcome {
    let Some(row) = rows.first() else {
        return EvalOutcome::error("no_data");
    };
    let max_hours = window_last_hours(&test.window).unwrap_or(f64::MAX);
    let hours_lag = row
        .get("HOURS_LAG")
        .and_then(value_as_f64)
        .unwrap_or(f64::MAX);
    let max_ts = row.get("MAX_TS").cloned().unwrap_or(Value::Null);

    let observed = json!({ "hours_lag": hours_lag, "max_hours": max_hours, "max_ts": max_ts });

    if hours_lag <= max_hours {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, None)
    }
}

fn evaluate_rule(test: &TestDefinition, rows: &[Row]) -> EvalOutcome {
    let violations = first_i64(rows, "VIOLATIONS").unwrap_or(0);
    let avg_diff = rows.first().and_then(|r| r.get("AVG_DIFF")).and_then(value_as_f64);
    let observed = json!({ "violations": violations, "avg_diff": avg_diff });

    let within_tolerance = match &test.tolerance {
        Some(Tolerance::Pct { value }) => avg_diff.map(|d| d.abs() <= *value).unwrap_or(false),
        _ => violations == 0,
    };

    if within_tolerance {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(violations))
    }
}

fn evaluate_reconciliation(rows: &[Row]) -> EvalOutcome {
    let count_diff = first_i64(rows, "COUNT_DIFF").unwrap_or(0);
    let status = if count_diff == 0 { "pass" } else { "warn" };
    EvalOutcome::warn_as_pass(json!({ "count_diff": count_diff, "status": status }))
}

fn evaluate_drift(rows: &[Row]) -> EvalOutcome {
    let current = first_i64(rows, "CURRENT_COUNT").unwrap_or(0);
    let baseline = first_i64(rows, "BASELINE_COUNT").unwrap_or(0);
    let diff = (current - baseline).abs();
    let status = if diff == 0 { "pass" } else { "warn" };
    EvalOutcome::warn_as_pass(json!({
        "current_count": current,
        "baseline_count": baseline,
        "diff": diff,
        "status": status,
    }))
}

fn evaluate_json_path_exists(rows: &[Row]) -> EvalOutcome {
    let missing_count = first_i64(rows, "MISSING_COUNT").unwrap_or(0);
    let present_count = first_i64(rows, "PRESENT_COUNT").unwrap_or(0);
    let observed = json!({ "present_count": present_count, "missing_count": missing_count });

    if missing_count == 0 {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(missing_count))
    }
}

fn evaluate_json_array_flatten(rows: &[Row]) -> EvalOutcome {
    let source = first_i64(rows, "SOURCE_ROW_COUNT").unwrap_or(0);
    let flattened = first_i64(rows, "FLATTENED_ROW_COUNT").unwrap_or(0);
    let cardinality_diff = (source - flattened).abs();
    let observed = json!({
        "source_row_count": source,
        "flattened_row_count": flattened,
        "cardinality_diff": cardinality_diff,
    });

    if cardinality_diff == 0 {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(cardinality_diff))
    }
}

fn evaluate_json_type_check(rows: &[Row]) -> EvalOutcome {
    let wrong_type_count = first_i64(rows, "WRONG_TYPE_COUNT").unwrap_or(0);
    let observed = json!({ "wrong_type_count": wrong_type_count });

    if wrong_type_count == 0 {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(wrong_type_count))
    }
}

fn evaluate_json_uniqueness(rows: &[Row]) -> EvalOutcome {
    let duplicate_count = rows.len() as i64;
    let observed = json!({ "duplicate_count": duplicate_count, "sample": sample(rows) });

    if duplicate_count == 0 {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(duplicate_count))
    }
}

fn evaluate_json_mapping_equivalence(rows: &[Row]) -> EvalOutcome {
    let mismatched_rows = first_i64(rows, "MISMATCHED_ROWS").unwrap_or(0);
    let observed = json!({ "mismatched_rows": mismatched_rows });

    if mismatched_rows == 0 {
        EvalOutcome::pass(observed)
    } else {
        EvalOutcome::fail(observed, Some(mismatched_rows))
    }
}
