//! The tagged-variant replacement for the distilled design's `Dict[str, Any]`
//! assertion payload. One variant per compiled test kind; `left`/`right`
//! carry column or path references, never raw user SQL fragments.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Assertion {
    Uniqueness {
        keys: Vec<String>,
    },
    NotNull {
        column: String,
    },
    RowCountRange {
        min_rows: i64,
        max_rows: Option<i64>,
    },
    Freshness {
        column: String,
        max_hours: f64,
    },
    Rule {
        left: String,
        expr: String,
        tolerance_abs: Option<f64>,
        tolerance_pct: Option<f64>,
    },
    Schema {
        expected_columns: Vec<String>,
    },
    Reconciliation {
        left_dataset: String,
        right_dataset: String,
        keys: Vec<String>,
    },
    Drift {
        column: String,
        baseline_window: String,
        current_window: String,
    },
    JsonPathExists {
        path: String,
    },
    JsonArrayFlatten {
        array_path: String,
    },
    JsonTypeCheck {
        path: String,
        expected_type: String,
    },
    JsonUniqueness {
        path: String,
    },
    JsonMappingEquivalence {
        path: String,
        column: String,
    },
    JsonValidity,
}

impl Assertion {
    /// `true` for any JSON/VARIANT-flavored assertion — these lower through
    /// the Snowflake `GET_PATH`/`FLATTEN` dialect path rather than plain SQL.
    pub fn is_json_kind(&self) -> bool {
        matches!(
            self,
            Assertion::JsonPathExists { .. }
                | Assertion::JsonArrayFlatten { .. }
                | Assertion::JsonTypeCheck { .. }
                | Assertion::JsonUniqueness { .. }
                | Assertion::JsonMappingEquivalence { .. }
                | Assertion::JsonValidity
        )
    }
}
