use std::path::{Path, PathBuf};

use appsync_core::{ConfigError, SyncConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    /// Accept optional bundle updates without asking.
    #[serde(default)]
    pub auto_accept_optional: bool,

    /// Packaged baseline bundle restored when the native version changes.
    #[serde(default)]
    pub baseline_archive: Option<PathBuf>,

    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_wait_timeout() -> u64 {
    600
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            auto_accept_optional: false,
            baseline_archive: None,
            wait_timeout_secs: default_wait_timeout(),
        }
    }
}

impl HostSettings {
    /// Read settings from `path`; a missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::HostSettings;

    #[test]
    fn defaults_match_expected_limits() {
        let settings = HostSettings::default();

        assert!(!settings.debug_logging);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.wait_timeout_secs, 600);
        assert!(!settings.auto_accept_optional);
        assert!(settings.baseline_archive.is_none());
        assert!(settings.sync.auto_hybrid_update);
    }

    #[test]
    fn nested_sync_settings_fill_missing_fields() {
        let value = json!({
            "sync": {
                "server_url": "https://sync.example.com",
                "project_identifier": "demo"
            },
            "auto_accept_optional": true
        });

        let settings: HostSettings =
            serde_json::from_value(value).expect("settings JSON should deserialize");

        assert_eq!(settings.sync.server_url, "https://sync.example.com");
        assert_eq!(settings.sync.reprompt_interval_days, 14);
        assert!(settings.auto_accept_optional);
        assert_eq!(settings.wait_timeout_secs, 600);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");

        let settings = HostSettings::load(&temp_dir.path().join("settings.json"))
            .expect("missing file should not be an error");

        assert!(settings.sync.server_url.is_empty());
    }

    #[test]
    fn malformed_file_is_reported() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ \"sync\": ").expect("settings file should be written");

        assert!(HostSettings::load(&path).is_err());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("config").join("settings.json");
        let mut settings = HostSettings::default();
        settings.sync.server_url = "https://sync.example.com".to_string();
        settings.wait_timeout_secs = 30;

        settings.save(&path).expect("settings should save");
        let loaded = HostSettings::load(&path).expect("settings should load");

        assert_eq!(loaded.sync.server_url, "https://sync.example.com");
        assert_eq!(loaded.wait_timeout_secs, 30);
    }
}
