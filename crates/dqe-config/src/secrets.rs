//! Secrets & auth-method resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"DQE_WAREHOUSE_PASSWORD"`).
//! - At startup, callers invoke [`resolve_secrets_for_mode`] once.
//! - The returned [`ResolvedSecrets`] is passed into constructors; never
//!   scatter `std::env::var` calls across the codebase.
//! - `Debug` impls on all secret-containing structs **redact** values.
//! - Error messages reference the env var **NAME**, never the value.
//!
//! # Mode-aware enforcement
//! - `production`: warehouse credential (password or private key path) is
//!   required. At least one of `password` / `private_key_path` must resolve.
//! - `ci`: warehouse credential required; AI provider key optional (external
//!   AI calls fall back to the deterministic stub — see `dqe-ai`).
//! - `local`: nothing required — every secret is optional.
//!
//! The artifact-store credential and AI provider key are always optional in
//! every mode: their absence degrades gracefully (no presigned URL; AI calls
//! stub) rather than blocking a run.

use anyhow::{bail, Result};
use serde_json::Value;

/// All runtime-resolved secrets for one engine instantiation.
///
/// Built **once** at startup via [`resolve_secrets_for_mode`]. Pass to
/// constructors. **Values are redacted in `Debug` output.**
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub warehouse_password: Option<String>,
    pub warehouse_private_key: Option<Vec<u8>>,
    pub warehouse_private_key_passphrase: Option<String>,
    pub ai_api_key: Option<String>,
    pub artifact_store_credential: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field(
                "warehouse_password",
                &self.warehouse_password.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "warehouse_private_key",
                &self.warehouse_private_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "warehouse_private_key_passphrase",
                &self
                    .warehouse_private_key_passphrase
                    .as_ref()
                    .map(|_| "<REDACTED>"),
            )
            .field(
                "ai_api_key",
                &self.ai_api_key.as_ref().map(|_| "<REDACTED>"),
            )
            .field(
                "artifact_store_credential",
                &self
                    .artifact_store_credential
                    .as_ref()
                    .map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

struct SecretEnvNames {
    warehouse_password_var: String,
    warehouse_private_key_path_var: String,
    warehouse_private_key_passphrase_var: String,
    ai_api_key_var: String,
    artifact_store_credential_var: String,
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    SecretEnvNames {
        warehouse_password_var: crate::read_str_at(config_json, "/warehouse/auth/password_env")
            .unwrap_or_else(|| "DQE_WAREHOUSE_PASSWORD".to_string()),
        warehouse_private_key_path_var: crate::read_str_at(
            config_json,
            "/warehouse/auth/private_key_path_env",
        )
        .unwrap_or_else(|| "DQE_WAREHOUSE_PRIVATE_KEY_PATH".to_string()),
        warehouse_private_key_passphrase_var: crate::read_str_at(
            config_json,
            "/warehouse/auth/private_key_passphrase_env",
        )
        .unwrap_or_else(|| "DQE_WAREHOUSE_PRIVATE_KEY_PASSPHRASE".to_string()),
        ai_api_key_var: crate::read_str_at(config_json, "/ai/api_key_env")
            .unwrap_or_else(|| "DQE_AI_API_KEY".to_string()),
        artifact_store_credential_var: crate::read_str_at(
            config_json,
            "/artifact_store/credential_env",
        )
        .unwrap_or_else(|| "DQE_ARTIFACT_STORE_CREDENTIAL".to_string()),
    }
}

/// Resolve all secrets from the environment for the given `mode` string.
///
/// `mode` is case-insensitive: `"production"`, `"ci"`, or `"local"`.
///
/// # Errors
/// Returns `Err` naming the first missing required env var. The actual
/// value is never mentioned.
pub fn resolve_secrets_for_mode(config_json: &Value, mode: &str) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);
    let mode_lower = mode.trim().to_ascii_lowercase();

    let warehouse_password = resolve_env(&names.warehouse_password_var);
    let warehouse_private_key = resolve_env(&names.warehouse_private_key_path_var)
        .and_then(|path| std::fs::read(&path).ok());
    let warehouse_private_key_passphrase =
        resolve_env(&names.warehouse_private_key_passphrase_var);
    let ai_api_key = resolve_env(&names.ai_api_key_var);
    let artifact_store_credential = resolve_env(&names.artifact_store_credential_var);

    let warehouse_credential_present =
        warehouse_password.is_some() || warehouse_private_key.is_some();

    match mode_lower.as_str() {
        "production" | "ci" => {
            if !warehouse_credential_present {
                bail!(
                    "SECRETS_MISSING mode={mode_lower}: neither '{}' (password) nor \
                     '{}' (private key path) is set",
                    names.warehouse_password_var,
                    names.warehouse_private_key_path_var,
                );
            }
        }
        "local" => {
            // No required secrets in local mode — everything is optional.
        }
        other => {
            bail!(
                "SECRETS_UNKNOWN_MODE: unrecognised mode '{}'; expected one of: \
                 production | ci | local",
                other,
            );
        }
    }

    Ok(ResolvedSecrets {
        warehouse_password,
        warehouse_private_key,
        warehouse_private_key_passphrase,
        ai_api_key,
        artifact_store_credential,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn local_mode_requires_nothing() {
        let cfg = json!({});
        let resolved = resolve_secrets_for_mode(&cfg, "local").unwrap();
        assert!(resolved.warehouse_password.is_none());
    }

    #[test]
    fn production_mode_without_credential_errors() {
        std::env::remove_var("DQE_WAREHOUSE_PASSWORD");
        std::env::remove_var("DQE_WAREHOUSE_PRIVATE_KEY_PATH");
        let cfg = json!({});
        let err = resolve_secrets_for_mode(&cfg, "production").unwrap_err();
        assert!(err.to_string().contains("SECRETS_MISSING"));
    }

    #[test]
    fn debug_output_redacts_values() {
        let resolved = ResolvedSecrets {
            warehouse_password: Some("hunter2".to_string()),
            warehouse_private_key: None,
            warehouse_private_key_passphrase: None,
            ai_api_key: None,
            artifact_store_credential: None,
        };
        let debug_str = format!("{:?}", resolved);
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("<REDACTED>"));
    }

    #[test]
    fn unknown_mode_errors() {
        let cfg = json!({});
        let err = resolve_secrets_for_mode(&cfg, "bogus").unwrap_err();
        assert!(err.to_string().contains("SECRETS_UNKNOWN_MODE"));
    }
}
