use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Engine settings, usually nested in the host's settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server_url: String,

    #[serde(default)]
    pub project_identifier: String,

    #[serde(default)]
    pub disable_native_update: bool,

    #[serde(default = "default_true")]
    pub auto_hybrid_update: bool,

    #[serde(default)]
    pub development_mode: bool,

    #[serde(default = "default_reprompt_interval_days")]
    pub reprompt_interval_days: u32,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_reprompt_interval_days() -> u32 {
    14
}

fn default_http_timeout() -> u64 {
    30
}

fn default_provider_timeout() -> u64 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            project_identifier: String::new(),
            disable_native_update: false,
            auto_hybrid_update: true,
            development_mode: false,
            reprompt_interval_days: default_reprompt_interval_days(),
            http_timeout_secs: default_http_timeout(),
            provider_timeout_secs: default_provider_timeout(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn new(server_url: impl Into<String>, project_identifier: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            project_identifier: project_identifier.into(),
            ..Self::default()
        }
    }

    /// # Errors
    /// Returns an error naming the first required setting that is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Missing("server_url"));
        }
        if self.project_identifier.trim().is_empty() {
            return Err(ConfigError::Missing("project_identifier"));
        }
        Ok(())
    }

    #[must_use]
    pub fn reprompt_interval(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.reprompt_interval_days))
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    #[must_use]
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    #[must_use]
    pub fn check_for_update_url(&self) -> String {
        format!(
            "{}/app_sync/check_for_update",
            self.server_url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::SyncConfig;
    use crate::error::ConfigError;

    #[test]
    fn defaults_match_expected_policy() {
        let config = SyncConfig::default();

        assert!(config.auto_hybrid_update);
        assert!(!config.disable_native_update);
        assert!(!config.development_mode);
        assert_eq!(config.reprompt_interval_days, 14);
        assert_eq!(config.reprompt_interval(), chrono::Duration::days(14));
        assert_eq!(config.http_timeout_secs, 30);
        assert_eq!(config.provider_timeout_secs, 5);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: SyncConfig = serde_json::from_value(json!({
            "server_url": "https://sync.example.com",
            "project_identifier": "demo",
            "auto_hybrid_update": false
        }))
        .expect("config JSON should deserialize");

        assert!(!config.auto_hybrid_update);
        assert_eq!(config.reprompt_interval_days, 14);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_project_identifier() {
        let config = SyncConfig::new("https://sync.example.com", " ");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("project_identifier"))
        ));
    }

    #[test]
    fn check_for_update_url_trims_trailing_slash() {
        let config = SyncConfig::new("https://sync.example.com/", "demo");

        assert_eq!(
            config.check_for_update_url(),
            "https://sync.example.com/app_sync/check_for_update"
        );
    }
}
