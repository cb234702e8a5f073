//! PII Redactor — column-name heuristics plus content-pattern substitution,
//! applied to warehouse rows before they ever leave the process (samples,
//! progress events, artifacts) and to free text handed to the AI provider.
//!
//! Safety is structural, not best-effort: [`redact_rows`] and [`redact_text`]
//! never propagate a raw value on internal failure — they fall back to an
//! empty row set or a sentinel string respectively.

use regex::Regex;
use serde_json::{Map, Value};

/// Column-name substrings (case-insensitive) that mark a column as PII.
const PII_COLUMN_HINTS: &[&str] = &[
    "email",
    "phone",
    "ssn",
    "social security",
    "credit card",
    "address",
    "name",
    "dob",
    "birth date",
];

const REDACTION_SENTINEL: &str = "[REDACTION_FAILED]";

/// `true` if `column` matches any PII heuristic substring, case-insensitive.
pub fn is_pii_column(column: &str) -> bool {
    let lower = column.to_ascii_lowercase();
    PII_COLUMN_HINTS.iter().any(|hint| lower.contains(hint))
}

struct ContentPattern {
    kind: &'static str,
    re: Regex,
}

fn content_patterns() -> Vec<ContentPattern> {
    vec![
        ContentPattern {
            kind: "EMAIL",
            re: Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap(),
        },
        ContentPattern {
            kind: "PHONE",
            re: Regex::new(r"\b(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b").unwrap(),
        },
        ContentPattern {
            kind: "SSN",
            re: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        },
        ContentPattern {
            kind: "CREDIT_CARD",
            re: Regex::new(r"\b(?:\d[ -]?){15}\d\b").unwrap(),
        },
        ContentPattern {
            kind: "IP_ADDRESS",
            re: Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b")
                .unwrap(),
        },
    ]
}

/// Substitute any recognized content pattern (email, NANP phone, SSN,
/// 16-digit card, IPv4) in `s` with `[REDACTED_<KIND>]`.
///
/// Falls back to [`REDACTION_SENTINEL`] if the substitution pass itself
/// fails unexpectedly — never returns the raw input on error.
pub fn redact_text(s: &str) -> String {
    match std::panic::catch_unwind(|| redact_text_inner(s)) {
        Ok(redacted) => redacted,
        Err(_) => REDACTION_SENTINEL.to_string(),
    }
}

fn redact_text_inner(s: &str) -> String {
    let mut out = s.to_string();
    for pattern in content_patterns() {
        let replacement = format!("[REDACTED_{}]", pattern.kind);
        out = pattern.re.replace_all(&out, replacement.as_str()).into_owned();
    }
    out
}

/// Mask a value by column-name heuristic: keep a small prefix/suffix and
/// replace the interior with `*`. Thresholds: length ≤ 4 is replaced
/// entirely (no edge is safe to reveal at that length); length ≤ 8 keeps
/// 2 characters on each edge; longer values keep 3 on each edge.
fn mask_value(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    if len == 0 {
        return String::new();
    }
    if len <= 4 {
        return "*".repeat(len);
    }
    let (prefix, suffix) = if len <= 8 { (2, 2) } else { (3, 3) };
    let head: String = chars[..prefix].iter().collect();
    let tail: String = chars[len - suffix..].iter().collect();
    let masked_middle = "*".repeat(len - prefix - suffix);
    format!("{head}{masked_middle}{tail}")
}

/// One row as returned from the warehouse: column name to JSON value.
pub type Row = Map<String, Value>;

/// Redact a batch of rows: PII-named columns are masked; every other string
/// value is passed through [`redact_text`] for content-pattern scrubbing.
///
/// On any internal failure, returns an empty `Vec` rather than the raw rows
/// (§4.B safety default).
pub fn redact_rows(rows: &[Row]) -> Vec<Row> {
    match std::panic::catch_unwind(|| redact_rows_inner(rows)) {
        Ok(redacted) => redacted,
        Err(_) => Vec::new(),
    }
}

fn redact_rows_inner(rows: &[Row]) -> Vec<Row> {
    rows.iter()
        .map(|row| {
            let mut out = Map::with_capacity(row.len());
            for (col, val) in row {
                let redacted = match val {
                    Value::Null => Value::Null,
                    Value::String(s) if is_pii_column(col) => Value::String(mask_value(s)),
                    Value::String(s) => Value::String(redact_text_inner(s)),
                    other if is_pii_column(col) => Value::String(mask_value(&other.to_string())),
                    other => other.clone(),
                };
                out.insert(col.clone(), redacted);
            }
            out
        })
        .collect()
}

/// Warn on `SELECT *` and on any PII column named explicitly in `sql`,
/// using `table_to_columns` to resolve which identifiers are PII for the
/// tables the query references.
pub fn validate_query_for_pii(
    sql: &str,
    table_to_columns: &std::collections::HashMap<String, Vec<String>>,
) -> Vec<String> {
    let mut warnings = Vec::new();

    let star_re = Regex::new(r"(?i)\bSELECT\s+\*").unwrap();
    if star_re.is_match(sql) {
        warnings.push("SELECT * may expose PII columns not explicitly reviewed".to_string());
    }

    for columns in table_to_columns.values() {
        for col in columns {
            if !is_pii_column(col) {
                continue;
            }
            let word_re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(col))).unwrap();
            if word_re.is_match(sql) {
                warnings.push(format!("query references PII column '{col}'"));
            }
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn is_pii_column_matches_case_insensitively() {
        assert!(is_pii_column("Email_Address"));
        assert!(is_pii_column("CUSTOMER_SSN"));
        assert!(!is_pii_column("order_id"));
    }

    #[test]
    fn mask_value_preserves_length_and_edges() {
        let masked = mask_value("Jonathan");
        assert_eq!(masked.chars().count(), 8);
        assert!(masked.starts_with("Jo"));
        assert!(masked.ends_with("an"));
        assert!(masked.contains('*'));
    }

    #[test]
    fn redact_text_substitutes_email() {
        let out = redact_text("contact jane.doe@example.com for details");
        assert!(out.contains("[REDACTED_EMAIL]"));
        assert!(!out.contains("jane.doe"));
    }

    #[test]
    fn redact_rows_masks_pii_columns_and_scrubs_content() {
        let rows = vec![{
            let mut m = Map::new();
            m.insert("customer_name".to_string(), json!("Jonathan Smith"));
            m.insert("notes".to_string(), json!("call 555-123-4567 tomorrow"));
            m.insert("order_id".to_string(), json!(42));
            m
        }];
        let redacted = redact_rows(&rows);
        let row = &redacted[0];
        assert_ne!(row["customer_name"], json!("Jonathan Smith"));
        assert!(row["notes"].as_str().unwrap().contains("[REDACTED_PHONE]"));
        assert_eq!(row["order_id"], json!(42));
    }

    #[test]
    fn redact_rows_leaves_null_untouched() {
        let rows = vec![{
            let mut m = Map::new();
            m.insert("email".to_string(), Value::Null);
            m
        }];
        let redacted = redact_rows(&rows);
        assert_eq!(redacted[0]["email"], Value::Null);
    }

    #[test]
    fn validate_query_for_pii_flags_star_and_explicit_columns() {
        let mut schema = std::collections::HashMap::new();
        schema.insert(
            "PROD.RAW.CUSTOMERS".to_string(),
            vec!["email".to_string(), "order_id".to_string()],
        );
        let warnings =
            validate_query_for_pii("SELECT * FROM PROD.RAW.CUSTOMERS", &schema);
        assert!(warnings.iter().any(|w| w.contains("SELECT *")));

        let warnings2 =
            validate_query_for_pii("SELECT email FROM PROD.RAW.CUSTOMERS", &schema);
        assert!(warnings2.iter().any(|w| w.contains("email")));
    }
}
