//! Intermediate Representation: the single hand-off point between the
//! compiler/AI adapter and SQL generation.

use serde::{Deserialize, Serialize};

use crate::Assertion;

/// The only dialect this system emits SQL for. Kept as an enum (rather than
/// a bare string) so a second dialect can be added later without touching
/// every call site's string literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Snowflake,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ir {
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregations: Vec<String>,
    pub assertion: Assertion,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<String>,
    pub dialect: Dialect,
}

impl Ir {
    pub fn new(dataset: impl Into<String>, assertion: Assertion) -> Self {
        Self {
            dataset: dataset.into(),
            filters: Vec::new(),
            joins: Vec::new(),
            aggregations: Vec::new(),
            assertion,
            partition_by: Vec::new(),
            dialect: Dialect::Snowflake,
        }
    }

    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }
}
