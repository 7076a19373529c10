//! JSON config document with `${VAR}` environment-variable resolution
//! for source credentials.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub api_key: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BoundingBoxConfig {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AreaTrackingConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bounding_box: Option<BoundingBoxConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub sources: HashMap<String, SourceConfig>,
    pub priority: Vec<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    pub area_tracking: Option<AreaTrackingConfig>,
    #[serde(default = "default_dark_period_hours")]
    pub dark_period_hours: u32,
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_poll_interval() -> u64 {
    60
}

fn default_dark_period_hours() -> u32 {
    24
}

fn default_db_path() -> String {
    "./ais_fusion.db".to_string()
}

impl Config {
    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_json::from_str(raw)?;
        config.resolve_env();
        Ok(config)
    }

    pub fn load_from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config at {}: {e}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Resolves `${VAR}` tokens in `api_key`/`username` against the
    /// process environment; an unresolved reference disables that
    /// source with a warning rather than failing load.
    fn resolve_env(&mut self) {
        for (name, source) in self.sources.iter_mut() {
            if let Some(key) = &source.api_key {
                match resolve_env_var(key) {
                    Some(resolved) => source.api_key = Some(resolved),
                    None => {
                        warn!(source = %name, "unresolved ${{VAR}} in api_key; disabling source");
                        source.enabled = false;
                    }
                }
            }
            if let Some(user) = &source.username {
                match resolve_env_var(user) {
                    Some(resolved) => source.username = Some(resolved),
                    None => {
                        warn!(source = %name, "unresolved ${{VAR}} in username; disabling source");
                        source.enabled = false;
                    }
                }
            }
        }
    }
}

fn resolve_env_var(value: &str) -> Option<String> {
    if let Some(var_name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        return std::env::var(var_name).ok();
    }
    Some(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_env_var_disables_source() {
        std::env::remove_var("AIS_TEST_MISSING_KEY");
        let raw = r#"{
            "sources": { "aisstream": { "enabled": true, "api_key": "${AIS_TEST_MISSING_KEY}" } },
            "priority": ["aisstream"],
            "poll_interval": 30,
            "dark_period_hours": 24
        }"#;
        let config = Config::from_json(raw).unwrap();
        assert!(!config.sources["aisstream"].enabled);
    }

    #[test]
    fn resolved_env_var_keeps_source_enabled() {
        std::env::set_var("AIS_TEST_PRESENT_KEY", "secret-value");
        let raw = r#"{
            "sources": { "aisstream": { "enabled": true, "api_key": "${AIS_TEST_PRESENT_KEY}" } },
            "priority": ["aisstream"],
            "poll_interval": 30,
            "dark_period_hours": 24
        }"#;
        let config = Config::from_json(raw).unwrap();
        assert!(config.sources["aisstream"].enabled);
        assert_eq!(config.sources["aisstream"].api_key.as_deref(), Some("secret-value"));
    }
}
