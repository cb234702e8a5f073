//! SQL Guardrail — the single choke-point between user/AI intent and the
//! warehouse.
//!
//! # Architecture
//!
//! Every SQL string that is about to reach the warehouse client passes
//! through [`Guardrail::validate`] first. There is no other path: the
//! warehouse client (`dqe-warehouse`) holds its guardrail privately and
//! calls it on every `explain`/`select`, mirroring the upstream
//! single-choke-point broker gateway — callers cannot reach the adapter
//! without the gate evaluating first.
//!
//! ```text
//! Compiler output (SQL)
//!     │
//!     └──► Guardrail::validate
//!              │
//!              ├── GuardrailError  ◄── rejected here, warehouse never called
//!              │
//!              └── Ok(())  ◄── only then does the warehouse client execute
//! ```
//!
//! The algorithm is purely lexical — no dialect parser — and intentionally
//! conservative: any ambiguity errs toward rejection. It is guardrail-in-
//! depth, not the sole defense; the warehouse role itself must be read-only.

use regex::Regex;

/// A single enumerated reason a SQL string was rejected. Callers surface the
/// reason but never the normalized SQL to end users (§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailError {
    EmptyStatement,
    MultipleStatements { count: usize },
    DisallowedPrefix { found: String },
    ForbiddenKeyword { keyword: String },
    SchemaNotAllowed { schema: String },
}

impl std::fmt::Display for GuardrailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardrailError::EmptyStatement => write!(f, "GUARDRAIL: empty statement"),
            GuardrailError::MultipleStatements { count } => {
                write!(f, "GUARDRAIL: expected one statement, found {count}")
            }
            GuardrailError::DisallowedPrefix { found } => {
                write!(f, "GUARDRAIL: disallowed statement prefix '{found}'")
            }
            GuardrailError::ForbiddenKeyword { keyword } => {
                write!(f, "GUARDRAIL: forbidden keyword '{keyword}'")
            }
            GuardrailError::SchemaNotAllowed { schema } => {
                write!(f, "GUARDRAIL: schema '{schema}' is not allowlisted")
            }
        }
    }
}

impl std::error::Error for GuardrailError {}

const ALLOWED_PREFIXES: &[&str] = &["SELECT", "WITH", "EXPLAIN"];

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "RENAME", "TRUNCATE",
    "GRANT", "REVOKE", "CALL", "USE", "COPY", "PUT", "GET", "BEGIN", "COMMIT", "ROLLBACK", "SET",
    "UNSET", "EXECUTE", "VACUUM", "ANALYZE",
];

/// Static, read-only analysis of a candidate SQL string.
///
/// Holds an optional `db.schema` allowlist; construction is cheap so callers
/// may build one per connection profile.
#[derive(Debug, Clone, Default)]
pub struct Guardrail {
    allowed_schemas: Option<Vec<String>>,
}

impl Guardrail {
    /// No schema allowlist configured — only the prefix/keyword checks apply.
    pub fn new() -> Self {
        Self {
            allowed_schemas: None,
        }
    }

    /// Restrict `FROM`/`JOIN` targets to the given `db.schema` prefixes
    /// (case-insensitive).
    pub fn with_allowed_schemas(schemas: Vec<String>) -> Self {
        Self {
            allowed_schemas: Some(schemas),
        }
    }

    /// Run the full validation pipeline in order, short-circuiting on the
    /// first violation encountered.
    pub fn validate(&self, sql: &str) -> Result<(), GuardrailError> {
        let normalized = normalize(sql);

        let statements = split_statements(&normalized);
        match statements.len() {
            0 => return Err(GuardrailError::EmptyStatement),
            1 => {}
            n => return Err(GuardrailError::MultipleStatements { count: n }),
        }
        let statement = statements[0];

        check_prefix(statement)?;
        check_forbidden_keywords(statement)?;
        if let Some(allowed) = &self.allowed_schemas {
            check_schema_allowlist(statement, allowed)?;
        }

        Ok(())
    }
}

/// Strip `--` line comments and `/* … */` block comments (possibly
/// multi-line), collapse whitespace, and trim.
fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let chars: Vec<char> = sql.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }
        if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i = (i + 2).min(chars.len());
            continue;
        }
        out.push(chars[i]);
        i += 1;
    }

    let collapsed: String = out.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

/// Split on `;`, discarding empty/whitespace-only fragments (e.g. a single
/// trailing semicolon).
fn split_statements(normalized: &str) -> Vec<&str> {
    normalized
        .split(';')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect()
}

fn check_prefix(statement: &str) -> Result<(), GuardrailError> {
    let first_token = statement
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .unwrap_or("");
    let upper = first_token.to_ascii_uppercase();
    if ALLOWED_PREFIXES.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(GuardrailError::DisallowedPrefix { found: upper })
    }
}

fn check_forbidden_keywords(statement: &str) -> Result<(), GuardrailError> {
    for kw in FORBIDDEN_KEYWORDS {
        let pattern = format!(r"(?i)\b{kw}\b");
        let re = Regex::new(&pattern).expect("static forbidden-keyword pattern must compile");
        if re.is_match(statement) {
            return Err(GuardrailError::ForbiddenKeyword {
                keyword: kw.to_string(),
            });
        }
    }
    Ok(())
}

fn check_schema_allowlist(statement: &str, allowed: &[String]) -> Result<(), GuardrailError> {
    let re = Regex::new(
        r"(?i)\b(FROM|JOIN)\s+([A-Z_][A-Z0-9_]*)\.([A-Z_][A-Z0-9_]*)\.([A-Z_][A-Z0-9_]*)",
    )
    .expect("static schema-reference pattern must compile");

    for caps in re.captures_iter(statement) {
        let db = &caps[2];
        let schema = &caps[3];
        let prefix = format!("{db}.{schema}");
        let is_allowed = allowed
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&prefix));
        if !is_allowed {
            return Err(GuardrailError::SchemaNotAllowed { schema: prefix });
        }
    }
    Ok(())
}
