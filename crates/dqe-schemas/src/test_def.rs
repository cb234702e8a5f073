//! TestDefinition / TestSuite — the immutable per-run inputs to a suite run.

use serde::{Deserialize, Serialize};

/// The high-level kind of check a test performs.
///
/// Unknown kinds never reach this enum: the compiler's deserialization
/// boundary rejects them before a `TestDefinition` is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    Uniqueness,
    NotNull,
    RowCount,
    Freshness,
    Rule,
    Schema,
    Reconciliation,
    Drift,
    JsonPathExists,
    JsonArrayFlatten,
    JsonTypeCheck,
    JsonUniqueness,
    JsonMappingEquivalence,
}

/// How a test's window is bounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Window {
    LastDays { days: u32 },
    LastHours { hours: u32 },
    BatchId { batch_id: String },
    Range { start: String, end: String },
}

/// Acceptable slack before a test is marked failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Tolerance {
    Abs { value: f64 },
    Pct { value: f64 },
    DupRows { count: i64 },
    Hours { value: f64 },
}

/// How strongly a failing test's outcome should be treated by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocker,
    Major,
    Minor,
}

/// Whether a failing test should stop the suite's overall gate or merely warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Fail,
    Warn,
}

/// Immutable per-run value describing one check.
///
/// `TestDefinition` is never mutated once a suite starts; the compiler reads
/// it to produce an [`crate::Ir`], and the evaluator reads it again
/// alongside warehouse rows to produce a [`crate::RunTest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Unique within the owning suite.
    pub name: String,
    pub kind: TestKind,
    /// Fully qualified `db.schema.table` or `schema.table`.
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Free text for `Rule`; lexed by the compiler, never concatenated raw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<Window>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<Tolerance>,
    pub severity: Severity,
    pub gate: Gate,
}

impl TestDefinition {
    /// Parse `db.schema.table`, `schema.table`, or `table`, returning
    /// `(database, schema, table)` with absent parts left `None`.
    pub fn parse_dataset(&self) -> (Option<&str>, Option<&str>, &str) {
        let parts: Vec<&str> = self.dataset.split('.').collect();
        match parts.as_slice() {
            [db, schema, table] => (Some(db), Some(schema), table),
            [schema, table] => (None, Some(schema), table),
            [table] => (None, None, table),
            _ => (None, None, self.dataset.as_str()),
        }
    }

    /// The `db.schema` prefix used by the guardrail's schema allowlist, if
    /// the dataset is fully qualified.
    pub fn schema_prefix(&self) -> Option<String> {
        let (db, schema, _) = self.parse_dataset();
        match (db, schema) {
            (Some(db), Some(schema)) => Some(format!("{db}.{schema}")),
            _ => None,
        }
    }
}

/// An ordered collection of tests sharing one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    pub connection: String,
    pub tests: Vec<TestDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Errors that make a [`TestSuite`] invalid before a run can start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuiteValidationError {
    DuplicateTestName { name: String },
    EmptySuite,
}

impl std::fmt::Display for SuiteValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateTestName { name } => {
                write!(f, "duplicate test name in suite: '{name}'")
            }
            Self::EmptySuite => write!(f, "suite has no tests"),
        }
    }
}

impl std::error::Error for SuiteValidationError {}

impl TestSuite {
    /// Enforce the suite invariant: test names unique within the suite.
    /// An empty suite is valid (§8 boundary behavior) and is not an error.
    pub fn validate_names(&self) -> Result<(), SuiteValidationError> {
        let mut seen = std::collections::HashSet::new();
        for t in &self.tests {
            if !seen.insert(t.name.as_str()) {
                return Err(SuiteValidationError::DuplicateTestName {
                    name: t.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> TestDefinition {
        TestDefinition {
            name: name.to_string(),
            kind: TestKind::RowCount,
            dataset: "PROD.RAW.ORDERS".to_string(),
            keys: vec![],
            expression: None,
            window: None,
            filters: vec![],
            tolerance: None,
            severity: Severity::Major,
            gate: Gate::Fail,
        }
    }

    #[test]
    fn parse_dataset_three_parts() {
        let t = sample("t1");
        assert_eq!(
            t.parse_dataset(),
            (Some("PROD"), Some("RAW"), "ORDERS")
        );
        assert_eq!(t.schema_prefix().as_deref(), Some("PROD.RAW"));
    }

    #[test]
    fn parse_dataset_two_parts_has_no_schema_prefix() {
        let mut t = sample("t1");
        t.dataset = "RAW.ORDERS".to_string();
        assert_eq!(t.parse_dataset(), (None, Some("RAW"), "ORDERS"));
        assert_eq!(t.schema_prefix(), None);
    }

    #[test]
    fn duplicate_names_rejected() {
        let suite = TestSuite {
            name: "s".to_string(),
            connection: "c".to_string(),
            tests: vec![sample("dup"), sample("dup")],
            tags: vec![],
        };
        assert_eq!(
            suite.validate_names(),
            Err(SuiteValidationError::DuplicateTestName {
                name: "dup".to_string()
            })
        );
    }

    #[test]
    fn empty_suite_is_valid() {
        let suite = TestSuite {
            name: "s".to_string(),
            connection: "c".to_string(),
            tests: vec![],
            tags: vec![],
        };
        assert!(suite.validate_names().is_ok());
    }
}
