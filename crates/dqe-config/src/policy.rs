//! `PolicySettings` — the recognized policy knobs and their defaults (§6).
//!
//! Every field here is read from merged config JSON with a named default,
//! mirroring the original's `settings.py` rather than inventing new
//! defaults: a config file that mentions none of these still gets the
//! original's exact behavior.

use serde_json::Value;

use crate::{read_bool_at, read_i64_at};

#[derive(Debug, Clone, PartialEq)]
pub struct PolicySettings {
    pub external_ai_enabled: bool,
    pub sql_preview_enabled: bool,
    pub admin_power_mode: bool,
    pub pii_redaction_enabled: bool,
    pub sample_row_limit: i64,
    pub default_time_budget_seconds: i64,
    pub max_time_budget_seconds: i64,
    pub run_retention_days: i64,
    pub artifact_retention_days: i64,
    // Supplemented fields (§6): named individually so the full policy
    // surface is exercisable, not just the distilled subset.
    pub ai_pii_redaction: bool,
    pub ai_prompt_logging: bool,
    pub explain_preflight: bool,
    pub auto_sampling_threshold: i64,
    pub static_secrets_forbidden: bool,
    pub vault_required: bool,
    pub network_isolation: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            external_ai_enabled: true,
            sql_preview_enabled: false,
            admin_power_mode: false,
            pii_redaction_enabled: true,
            sample_row_limit: 100,
            default_time_budget_seconds: 900,
            max_time_budget_seconds: 3600,
            run_retention_days: 90,
            artifact_retention_days: 30,
            ai_pii_redaction: true,
            ai_prompt_logging: false,
            explain_preflight: true,
            auto_sampling_threshold: 1_000_000,
            static_secrets_forbidden: true,
            vault_required: false,
            network_isolation: false,
        }
    }
}

impl PolicySettings {
    /// `sql_preview_enabled` AND `admin_power_mode` must both hold for the
    /// compiled SQL to ever be returned to a caller (§6).
    pub fn sql_preview_allowed(&self) -> bool {
        self.sql_preview_enabled && self.admin_power_mode
    }
}

/// Read `PolicySettings` from merged config JSON under `/policies/*`,
/// falling back to the original's defaults for anything absent.
pub fn read_policy_settings(config_json: &Value) -> PolicySettings {
    let d = PolicySettings::default();
    PolicySettings {
        external_ai_enabled: read_bool_at(config_json, "/policies/external_ai_enabled", d.external_ai_enabled),
        sql_preview_enabled: read_bool_at(config_json, "/policies/sql_preview_enabled", d.sql_preview_enabled),
        admin_power_mode: read_bool_at(config_json, "/policies/admin_power_mode", d.admin_power_mode),
        pii_redaction_enabled: read_bool_at(
            config_json,
            "/policies/pii_redaction_enabled",
            d.pii_redaction_enabled,
        ),
        sample_row_limit: read_i64_at(config_json, "/policies/sample_row_limit", d.sample_row_limit),
        default_time_budget_seconds: read_i64_at(
            config_json,
            "/policies/default_time_budget_seconds",
            d.default_time_budget_seconds,
        ),
        max_time_budget_seconds: read_i64_at(
            config_json,
            "/policies/max_time_budget_seconds",
            d.max_time_budget_seconds,
        ),
        run_retention_days: read_i64_at(config_json, "/policies/run_retention_days", d.run_retention_days),
        artifact_retention_days: read_i64_at(
            config_json,
            "/policies/artifact_retention_days",
            d.artifact_retention_days,
        ),
        ai_pii_redaction: read_bool_at(config_json, "/policies/ai_pii_redaction", d.ai_pii_redaction),
        ai_prompt_logging: read_bool_at(config_json, "/policies/ai_prompt_logging", d.ai_prompt_logging),
        explain_preflight: read_bool_at(config_json, "/policies/explain_preflight", d.explain_preflight),
        auto_sampling_threshold: read_i64_at(
            config_json,
            "/policies/auto_sampling_threshold",
            d.auto_sampling_threshold,
        ),
        static_secrets_forbidden: read_bool_at(
            config_json,
            "/policies/static_secrets_forbidden",
            d.static_secrets_forbidden,
        ),
        vault_required: read_bool_at(config_json, "/policies/vault_required", d.vault_required),
        network_isolation: read_bool_at(config_json, "/policies/network_isolation", d.network_isolation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_the_original_when_config_is_empty() {
        let policy = read_policy_settings(&json!({}));
        assert_eq!(policy.sample_row_limit, 100);
        assert_eq!(policy.default_time_budget_seconds, 900);
        assert_eq!(policy.max_time_budget_seconds, 3600);
        assert_eq!(policy.auto_sampling_threshold, 1_000_000);
        assert_eq!(policy.run_retention_days, 90);
        assert_eq!(policy.artifact_retention_days, 30);
    }

    #[test]
    fn sql_preview_requires_both_flags() {
        let mut policy = PolicySettings::default();
        assert!(!policy.sql_preview_allowed());
        policy.sql_preview_enabled = true;
        assert!(!policy.sql_preview_allowed());
        policy.admin_power_mode = true;
        assert!(policy.sql_preview_allowed());
    }

    #[test]
    fn explicit_config_overrides_defaults() {
        let policy = read_policy_settings(&json!({
            "policies": { "sample_row_limit": 25, "vault_required": true }
        }));
        assert_eq!(policy.sample_row_limit, 25);
        assert!(policy.vault_required);
        assert_eq!(policy.default_time_budget_seconds, 900);
    }
}
