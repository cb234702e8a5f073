//! Layered YAML configuration with a canonical, hashed representation.
//!
//! Later files in the merge order override earlier ones via deep-merge. The
//! result is canonicalized (recursive key sort) before hashing so that two
//! logically identical configs always produce the same `config_hash`,
//! regardless of key order in the source files.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub mod policy;
pub mod secrets;

pub use policy::{read_policy_settings, PolicySettings};
pub use secrets::{resolve_secrets_for_mode, ResolvedSecrets};

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

/// Read a non-empty string value at `pointer` from a JSON config.
pub fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read a boolean policy flag, defaulting when absent.
pub fn read_bool_at(config: &Value, pointer: &str, default: bool) -> bool {
    config
        .pointer(pointer)
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Read an integer policy value, defaulting when absent.
pub fn read_i64_at(config: &Value, pointer: &str, default: i64) -> i64 {
    config
        .pointer(pointer)
        .and_then(Value::as_i64)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn later_file_overrides_earlier() {
        let base = write_tmp("warehouse:\n  account: base_acct\n  role: base_role\n");
        let env = write_tmp("warehouse:\n  account: prod_acct\n");

        let loaded = load_layered_yaml(&[
            base.path().to_str().unwrap(),
            env.path().to_str().unwrap(),
        ])
        .unwrap();

        assert_eq!(
            loaded.config_json.pointer("/warehouse/account").unwrap(),
            "prod_acct"
        );
        assert_eq!(
            loaded.config_json.pointer("/warehouse/role").unwrap(),
            "base_role"
        );
    }

    #[test]
    fn hash_is_stable_across_key_order() {
        let a = write_tmp("b: 2\na: 1\n");
        let b = write_tmp("a: 1\nb: 2\n");

        let loaded_a = load_layered_yaml(&[a.path().to_str().unwrap()]).unwrap();
        let loaded_b = load_layered_yaml(&[b.path().to_str().unwrap()]).unwrap();

        assert_eq!(loaded_a.config_hash, loaded_b.config_hash);
    }
}
