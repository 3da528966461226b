use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuglensConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub triage: TriageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_buffer_cap")]
    pub buffer_cap: usize,
    #[serde(default = "default_async_stack_depth")]
    pub async_stack_depth: i64,
    #[serde(default = "default_merge_pre_attach")]
    pub merge_pre_attach: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_cap: default_buffer_cap(),
            async_stack_depth: default_async_stack_depth(),
            merge_pre_attach: default_merge_pre_attach(),
        }
    }
}

fn default_buffer_cap() -> usize {
    200
}

fn default_async_stack_depth() -> i64 {
    32
}

fn default_merge_pre_attach() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default = "default_persistent_cap")]
    pub persistent_cap: usize,
    #[serde(default = "default_max_age_minutes")]
    pub max_age_minutes: i64,
    #[serde(default = "default_orphan_grace_minutes")]
    pub orphan_grace_minutes: i64,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_maintenance_slice")]
    pub maintenance_slice: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            persistent_cap: default_persistent_cap(),
            max_age_minutes: default_max_age_minutes(),
            orphan_grace_minutes: default_orphan_grace_minutes(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
            maintenance_slice: default_maintenance_slice(),
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".buglens")
        .join("state.json")
}

fn default_persistent_cap() -> usize {
    500
}

fn default_max_age_minutes() -> i64 {
    15
}

fn default_orphan_grace_minutes() -> i64 {
    120
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_maintenance_slice() -> usize {
    64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
    #[serde(default = "default_processed_ttl_hours")]
    pub processed_ttl_hours: i64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            processed_ttl_hours: default_processed_ttl_hours(),
        }
    }
}

fn default_window_ms() -> i64 {
    5000
}

fn default_processed_ttl_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default = "default_triage_enabled")]
    pub enabled: bool,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Empty means every origin qualifies.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_min_status")]
    pub min_status: u16,
    #[serde(default = "default_rate_limit_max")]
    pub rate_limit_max: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: i64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_quota_pause_minutes")]
    pub quota_pause_minutes: i64,
    #[serde(default = "default_overload_pause_minutes")]
    pub overload_pause_minutes: i64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_context_entries")]
    pub context_entries: usize,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            enabled: default_triage_enabled(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            models: default_models(),
            allowed_domains: Vec::new(),
            min_status: default_min_status(),
            rate_limit_max: default_rate_limit_max(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            quota_pause_minutes: default_quota_pause_minutes(),
            overload_pause_minutes: default_overload_pause_minutes(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
            context_entries: default_context_entries(),
        }
    }
}

fn default_triage_enabled() -> bool {
    true
}

fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_api_key_env() -> String {
    "BUGLENS_API_KEY".to_string()
}

fn default_models() -> Vec<String> {
    vec![
        "gemini-2.0-flash".to_string(),
        "gemini-1.5-flash".to_string(),
        "gemini-1.5-pro".to_string(),
    ]
}

fn default_min_status() -> u16 {
    400
}

fn default_rate_limit_max() -> u32 {
    10
}

fn default_rate_limit_window_secs() -> i64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_quota_pause_minutes() -> i64 {
    10
}

fn default_overload_pause_minutes() -> i64 {
    15
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_output_tokens() -> u32 {
    2048
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_context_entries() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: BuglensConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.capture.buffer_cap, 200);
        assert_eq!(config.dedup.window_ms, 5000);
        assert_eq!(config.dedup.processed_ttl_hours, 24);
        assert_eq!(config.persistence.max_age_minutes, 15);
        assert_eq!(config.persistence.orphan_grace_minutes, 120);
        assert_eq!(config.triage.rate_limit_max, 10);
        assert_eq!(config.triage.max_delay_ms, 30000);
        assert!(config.triage.allowed_domains.is_empty());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: BuglensConfig =
            serde_json::from_str(r#"{"triage": {"rate_limit_max": 2, "models": ["m1", "m2"]}}"#)
                .unwrap();
        assert_eq!(config.triage.rate_limit_max, 2);
        assert_eq!(config.triage.models, vec!["m1", "m2"]);
        assert_eq!(config.triage.quota_pause_minutes, 10);
        assert!(config.triage.enabled);
    }
}
