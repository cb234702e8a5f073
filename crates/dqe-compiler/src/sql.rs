//! Assertion → SQL. The single generator funnel both compile modes (§4.D)
//! pass through: template mode builds an [`Assertion`] then calls this;
//! IR/AI mode already has one.

use dqe_schemas::{Assertion, Ir};
use serde_json::{json, Value};

pub struct CompiledQuery {
    pub sql: String,
    pub expected: Value,
}

fn where_clause(filters: &[String]) -> String {
    if filters.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filters.join(" AND "))
    }
}

fn parse_dataset(dataset: &str) -> (Option<&str>, Option<&str>, &str) {
    let parts: Vec<&str> = dataset.split('.').collect();
    match parts.as_slice() {
        [db, schema, table] => (Some(db), Some(schema), table),
        [schema, table] => (None, Some(schema), table),
        [table] => (None, None, table),
        _ => (None, None, dataset),
    }
}

pub fn compile_assertion_sql(ir: &Ir) -> CompiledQuery {
    let table = &ir.dataset;
    let where_sql = where_clause(&ir.filters);

    match &ir.assertion {
        Assertion::RowCountRange { min_rows, max_rows } => CompiledQuery {
            sql: format!("SELECT COUNT(*) AS ROW_COUNT FROM {table}{where_sql}"),
            expected: json!({ "min_rows": min_rows, "max_rows": max_rows }),
        },

        Assertion::Schema { expected_columns } => {
            let (db, schema, table_name) = parse_dataset(table);
            let mut sql = format!(
                "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
                 WHERE TABLE_NAME = '{}'",
                table_name.to_ascii_uppercase()
            );
            if let Some(schema) = schema {
                sql.push_str(&format!(" AND TABLE_SCHEMA = '{}'", schema.to_ascii_uppercase()));
            }
            if let Some(db) = db {
                sql.push_str(&format!(" AND TABLE_CATALOG = '{}'", db.to_ascii_uppercase()));
            }
            sql.push_str(" ORDER BY ORDINAL_POSITION");
            CompiledQuery {
                sql,
                expected: json!({ "expected_columns": expected_columns }),
            }
        }

        Assertion::NotNull { column } => {
            let col = column.to_ascii_uppercase();
            let extra = if ir.filters.is_empty() {
                String::new()
            } else {
                format!(" AND {}", ir.filters.join(" AND "))
            };
            CompiledQuery {
                sql: format!("SELECT COUNT(*) AS NULL_COUNT FROM {table} WHERE {col} IS NULL{extra}"),
                expected: json!({ "expected_nulls": 0 }),
            }
        }

        Assertion::Uniqueness { keys } => {
            let cols = keys
                .iter()
                .map(|k| k.to_ascii_uppercase())
                .collect::<Vec<_>>()
                .join(", ");
            CompiledQuery {
                sql: format!(
                    "SELECT {cols}, COUNT(*) AS DUPLICATE_COUNT FROM {table}{where_sql} \
                     GROUP BY {cols} HAVING COUNT(*)>1"
                ),
                expected: json!({ "tolerance_dup_rows": 0 }),
            }
        }

        Assertion::Freshness { column, max_hours } => {
            let col = column.to_ascii_uppercase();
            CompiledQuery {
                sql: format!(
                    "SELECT MAX({col}) AS MAX_TS, CURRENT_TIMESTAMP() AS NOW, \
                     DATEDIFF('hour', MAX({col}), CURRENT_TIMESTAMP()) AS HOURS_LAG \
                     FROM {table}{where_sql}"
                ),
                expected: json!({ "max_hours": max_hours }),
            }
        }

        Assertion::Rule {
            left,
            expr,
            tolerance_abs,
            tolerance_pct,
        } => {
            // `left`/`expr` are already-rendered, safe SQL fragments: the
            // compiler lexes `rule.expression` before an Assertion::Rule is
            // ever constructed (see `dqe_compiler::to_assertion`).
            let tol = tolerance_abs.unwrap_or(0.0);
            CompiledQuery {
                sql: format!(
                    "SELECT COUNT(*) AS VIOLATIONS, AVG(ABS({left}-({expr}))) AS AVG_DIFF \
                     FROM {table}{where_sql_and} ABS({left}-({expr})) > {tol}",
                    where_sql_and = if where_sql.is_empty() { " WHERE".to_string() } else { format!("{where_sql} AND") },
                ),
                expected: json!({ "tolerance_abs": tolerance_abs, "tolerance_pct": tolerance_pct }),
            }
        }

        Assertion::Reconciliation {
            left_dataset,
            right_dataset,
            keys,
        } => CompiledQuery {
            sql: format!(
                "SELECT (SELECT COUNT(*) FROM {left_dataset}) AS LEFT_COUNT, \
                 (SELECT COUNT(*) FROM {right_dataset}) AS RIGHT_COUNT, \
                 ABS((SELECT COUNT(*) FROM {left_dataset}) - (SELECT COUNT(*) FROM {right_dataset})) \
                 AS COUNT_DIFF"
            ),
            expected: json!({ "count_diff": 0, "keys": keys }),
        },

        Assertion::Drift {
            column,
            baseline_window,
            current_window,
        } => {
            let col = column.to_ascii_uppercase();
            let baseline_filter = render_named_window(baseline_window, &col);
            let current_filter = render_named_window(current_window, &col);
            CompiledQuery {
                sql: format!(
                    "SELECT (SELECT COUNT(*) FROM {table} WHERE {current_filter}) AS CURRENT_COUNT, \
                     (SELECT COUNT(*) FROM {table} WHERE {baseline_filter}) AS BASELINE_COUNT"
                ),
                expected: json!({ "baseline_window": baseline_window, "current_window": current_window }),
            }
        }

        Assertion::JsonPathExists { path } => CompiledQuery {
            sql: format!(
                "SELECT COUNT(*) AS PRESENT_COUNT, COUNT_IF(GET_PATH(PAYLOAD, '{path}') IS NULL) \
                 AS MISSING_COUNT FROM {table}{where_sql}"
            ),
            expected: json!({ "missing_count": 0 }),
        },

        Assertion::JsonArrayFlatten { array_path } => CompiledQuery {
            sql: format!(
                "SELECT (SELECT COUNT(*) FROM {table}{where_sql}) AS SOURCE_ROW_COUNT, \
                 (SELECT COUNT(*) FROM {table}{where_sql}, \
                 LATERAL FLATTEN(input => GET_PATH(PAYLOAD, '{array_path}'))) AS FLATTENED_ROW_COUNT"
            ),
            expected: json!({ "cardinality_diff": 0 }),
        },

        Assertion::JsonTypeCheck { path, expected_type } => CompiledQuery {
            sql: format!(
                "SELECT COUNT(*) AS WRONG_TYPE_COUNT FROM {table}{where_sql_and} \
                 TYPEOF(GET_PATH(PAYLOAD, '{path}')) <> '{expected_type}'",
                where_sql_and = if where_sql.is_empty() { " WHERE".to_string() } else { format!("{where_sql} AND") },
            ),
            expected: json!({ "expected_type": expected_type, "wrong_type_count": 0 }),
        },

        Assertion::JsonUniqueness { path } => CompiledQuery {
            sql: format!(
                "SELECT GET_PATH(PAYLOAD, '{path}') AS JSON_KEY, COUNT(*) AS DUPLICATE_COUNT \
                 FROM {table}{where_sql} GROUP BY GET_PATH(PAYLOAD, '{path}') HAVING COUNT(*)>1"
            ),
            expected: json!({ "duplicate_count": 0 }),
        },

        Assertion::JsonMappingEquivalence { path, column } => {
            let col = column.to_ascii_uppercase();
            CompiledQuery {
                sql: format!(
                    "SELECT COUNT(*) AS MISMATCHED_ROWS FROM {table}{where_sql_and} \
                     TRY_TO_VARCHAR({col}) <> TRY_TO_VARCHAR(GET_PATH(PAYLOAD, '{path}'))",
                    where_sql_and = if where_sql.is_empty() { " WHERE".to_string() } else { format!("{where_sql} AND") },
                ),
                expected: json!({ "column": column, "path": path, "mismatched_rows": 0 }),
            }
        }

        Assertion::JsonValidity => CompiledQuery {
            sql: format!(
                "SELECT COUNT(*) AS INVALID_COUNT FROM {table}{where_sql_and} \
                 TRY_PARSE_JSON(PAYLOAD) IS NULL",
                where_sql_and = if where_sql.is_empty() { " WHERE".to_string() } else { format!("{where_sql} AND") },
            ),
            expected: json!({ "invalid_count": 0 }),
        },
    }
}

/// A small fixed vocabulary of named drift windows, rendered to safe SQL
/// fragments. `baseline_window`/`current_window` are tags chosen by the
/// suite author, never raw SQL — anything outside the vocabulary degrades
/// to an always-true filter rather than being concatenated verbatim.
fn render_named_window(name: &str, column: &str) -> String {
    match name {
        "last_7_days" => format!("{column} >= DATEADD('day', -7, CURRENT_DATE())"),
        "last_24_hours" => format!("{column} >= DATEADD('hour', -24, CURRENT_TIMESTAMP())"),
        "last_30_days" => format!("{column} >= DATEADD('day', -30, CURRENT_DATE())"),
        "previous_batch" | "current" => "TRUE".to_string(),
        _ => "TRUE".to_string(),
    }
}
