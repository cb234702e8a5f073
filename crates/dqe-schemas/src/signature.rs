//! Dataset signatures: a stable, order-independent SHA-256 over a dataset's
//! column shape, used to detect schema drift between catalog snapshots.

use sha2::{Digest, Sha256};

/// One column's shape as used by [`dataset_signature`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// SHA-256 over the canonical `name:type:nullable|…` form of `columns`,
/// sorted by name — reordering columns must not change the signature (§3.v).
pub fn dataset_signature(columns: &[ColumnShape]) -> String {
    let mut sorted: Vec<&ColumnShape> = columns.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let canonical = sorted
        .iter()
        .map(|c| format!("{}:{}:{}", c.name, c.data_type, c.nullable))
        .collect::<Vec<_>>()
        .join("|");

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str, nullable: bool) -> ColumnShape {
        ColumnShape {
            name: name.to_string(),
            data_type: ty.to_string(),
            nullable,
        }
    }

    #[test]
    fn reordering_columns_yields_same_signature() {
        let a = vec![col("id", "NUMBER", false), col("name", "TEXT", true)];
        let b = vec![col("name", "TEXT", true), col("id", "NUMBER", false)];
        assert_eq!(dataset_signature(&a), dataset_signature(&b));
    }

    #[test]
    fn changed_type_changes_signature() {
        let a = vec![col("id", "NUMBER", false)];
        let b = vec![col("id", "TEXT", false)];
        assert_ne!(dataset_signature(&a), dataset_signature(&b));
    }
}
