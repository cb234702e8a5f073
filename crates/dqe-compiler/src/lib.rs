//! Test Compiler — lowers a [`TestDefinition`] to an [`Ir`] (template mode)
//! and an [`Ir`] to dialect SQL (shared by both template and AI/IR modes).
//!
//! No SQL in this crate is ever built by string-interpolating a caller's
//! free text directly: the `rule.expression` path goes through [`expr`], a
//! minimal lexer/parser that only understands columns, numeric/string
//! literals, and `+ - * / ( ) ==` — anything else is a [`CompileError`], not
//! a pass-through.

pub mod expr;
mod sql;

use dqe_schemas::{Assertion, Dialect, Ir, TestDefinition, TestKind, Tolerance, Window};

pub use sql::CompiledQuery;

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    MissingField { test: String, field: &'static str },
    InvalidExpression { test: String, detail: String },
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::MissingField { test, field } => {
                write!(f, "test '{test}' is missing required field '{field}'")
            }
            CompileError::InvalidExpression { test, detail } => {
                write!(f, "test '{test}' has an invalid expression: {detail}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Result of compiling one [`TestDefinition`] in template mode: the [`Ir`]
/// that was lowered to, the SQL generated from it, and any warnings
/// (e.g. an unknown/underspecified kind silently downgraded to `row_count`).
pub struct TemplateCompilation {
    pub ir: Ir,
    pub query: CompiledQuery,
    pub warnings: Vec<String>,
}

/// Compile a [`TestDefinition`] deterministically, with no AI involvement.
/// Same input always produces byte-identical SQL (§8 invariant).
pub fn compile_template(test: &TestDefinition) -> TemplateCompilation {
    let mut warnings = Vec::new();

    let assertion = match to_assertion(test) {
        Ok(a) => a,
        Err(e) => {
            warnings.push(format!(
                "falling back to row_count: {e} (underspecified '{:?}' test)",
                test.kind
            ));
            Assertion::RowCountRange {
                min_rows: 0,
                max_rows: None,
            }
        }
    };

    let ir = Ir::new(test.dataset.clone(), assertion).with_filters(test.filters.clone());
    let query = sql::compile_assertion_sql(&ir);

    TemplateCompilation {
        ir,
        query,
        warnings,
    }
}

/// Compile an already-produced [`Ir`] (typically from the AI provider) to
/// SQL. This is the single generator both template mode and IR mode funnel
/// through — an `Ir` carrying a JSON-flavored [`Assertion`] automatically
/// takes the Snowflake `GET_PATH`/`FLATTEN` path; everything else takes the
/// plain relational path.
pub fn compile_ir(ir: &Ir) -> CompiledQuery {
    sql::compile_assertion_sql(ir)
}

/// Lower a [`TestDefinition`]'s kind-specific fields to an [`Assertion`].
///
/// `TestDefinition`'s field set is deliberately small (§3): `keys[]`,
/// `expression`, `window`, `filters[]`, `tolerance` are reused across kinds
/// rather than growing one field per kind. The mapping:
///
/// | kind | reuses |
/// |---|---|
/// | `not_null` | `keys[0]` = column |
/// | `uniqueness` | `keys[]` = dedup columns |
/// | `freshness` | `keys[0]` = timestamp column, `window` = `LastHours` |
/// | `rule` | `expression` = `A == f(B,…)`, `tolerance` = abs/pct |
/// | `schema` | `keys[]` = expected column names |
/// | `row_count` | `expression` = `"min=N"` / `"max=N"` / `"min=N,max=N"` |
/// | `reconciliation` | `keys[]` = join keys, `filters[0]` = right dataset |
/// | `drift` | `keys[0]` = column, `expression` = named baseline window |
fn to_assertion(test: &TestDefinition) -> Result<Assertion, CompileError> {
    let missing = |field: &'static str| CompileError::MissingField {
        test: test.name.clone(),
        field,
    };

    match test.kind {
        TestKind::RowCount => {
            let (min_rows, max_rows) = parse_row_count_bounds(test.expression.as_deref());
            Ok(Assertion::RowCountRange { min_rows, max_rows })
        }
        TestKind::Schema => Ok(Assertion::Schema {
            expected_columns: test.keys.clone(),
        }),
        TestKind::NotNull => {
            let column = test.keys.first().ok_or_else(|| missing("keys[0]"))?.clone();
            Ok(Assertion::NotNull { column })
        }
        TestKind::Uniqueness => {
            if test.keys.is_empty() {
                return Err(missing("keys[]"));
            }
            Ok(Assertion::Uniqueness {
                keys: test.keys.clone(),
            })
        }
        TestKind::Freshness => {
            let column = test.keys.first().ok_or_else(|| missing("keys[0]"))?.clone();
            let max_hours = match &test.window {
                Some(Window::LastHours { hours }) => *hours as f64,
                Some(Window::LastDays { days }) => *days as f64 * 24.0,
                _ => return Err(missing("window (last_hours|last_days)")),
            };
            Ok(Assertion::Freshness { column, max_hours })
        }
        TestKind::Rule => {
            let expression = test
                .expression
                .as_deref()
                .ok_or_else(|| missing("expression"))?;
            let (left_raw, expr_raw) = split_rule_expression(expression).map_err(|detail| {
                CompileError::InvalidExpression {
                    test: test.name.clone(),
                    detail,
                }
            })?;
            let left = expr::parse_and_render(&left_raw).map_err(|detail| {
                CompileError::InvalidExpression {
                    test: test.name.clone(),
                    detail,
                }
            })?;
            let expr = expr::parse_and_render(&expr_raw).map_err(|detail| {
                CompileError::InvalidExpression {
                    test: test.name.clone(),
                    detail,
                }
            })?;
            let (tolerance_abs, tolerance_pct) = match &test.tolerance {
                Some(Tolerance::Abs { value }) => (Some(*value), None),
                Some(Tolerance::Pct { value }) => (None, Some(*value)),
                _ => (None, None),
            };
            Ok(Assertion::Rule {
                left,
                expr,
                tolerance_abs,
                tolerance_pct,
            })
        }
        TestKind::Reconciliation => {
            let right_dataset = test.filters.first().ok_or_else(|| missing("filters[0]"))?.clone();
            if test.keys.is_empty() {
                return Err(missing("keys[]"));
            }
            Ok(Assertion::Reconciliation {
                left_dataset: test.dataset.clone(),
                right_dataset,
                keys: test.keys.clone(),
            })
        }
        TestKind::Drift => {
            let column = test.keys.first().ok_or_else(|| missing("keys[0]"))?.clone();
            let baseline_window = test
                .expression
                .clone()
                .unwrap_or_else(|| "last_7_days".to_string());
            Ok(Assertion::Drift {
                column,
                baseline_window,
                current_window: "current".to_string(),
            })
        }
        TestKind::JsonPathExists => {
            let path = test.expression.clone().ok_or_else(|| missing("expression (json path)"))?;
            Ok(Assertion::JsonPathExists { path })
        }
        TestKind::JsonArrayFlatten => {
            let array_path = test
                .expression
                .clone()
                .ok_or_else(|| missing("expression (json array path)"))?;
            Ok(Assertion::JsonArrayFlatten { array_path })
        }
        TestKind::JsonTypeCheck => {
            let path = test.expression.clone().ok_or_else(|| missing("expression (json path)"))?;
            let expected_type = test
                .keys
                .first()
                .ok_or_else(|| missing("keys[0] (expected json type)"))?
                .clone();
            Ok(Assertion::JsonTypeCheck { path, expected_type })
        }
        TestKind::JsonUniqueness => {
            let path = test.expression.clone().ok_or_else(|| missing("expression (json path)"))?;
            Ok(Assertion::JsonUniqueness { path })
        }
        TestKind::JsonMappingEquivalence => {
            let path = test.expression.clone().ok_or_else(|| missing("expression (json path)"))?;
            let column = test.keys.first().ok_or_else(|| missing("keys[0]"))?.clone();
            Ok(Assertion::JsonMappingEquivalence { path, column })
        }
    }
}

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

/// Split `A == f(B,…)` on the top-level `==`, returning the trimmed left
/// and right halves as separate expressions for [`expr`] to lex and render
/// independently. Anything other than exactly one `==` is rejected.
fn split_rule_expression(expression: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = expression.split("==").collect();
    match parts.as_slice() {
        [left, right] => Ok((left.trim().to_string(), right.trim().to_string())),
        _ => Err(format!(
            "expected exactly one '==' in rule expression, found {}",
            parts.len().saturating_sub(1)
        )),
    }
}

/// Always [`Dialect::Snowflake`] today — kept distinct from a bare string so
/// a second dialect slots in without touching call sites.
pub fn default_dialect() -> Dialect {
    Dialect::Snowflake
}
