use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR_NAME: &str = "appsync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PathsError {
    #[error("Could not determine home directory")]
    HomeDirUnavailable,
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

/// On-disk layout shared by the sync engine and its host.
#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl SyncPaths {
    /// Build the per-user paths for the current platform.
    ///
    /// # Errors
    /// Returns an error when a required base directory (for example the user
    /// home/config/data directory) cannot be determined.
    pub fn new() -> Result<Self, PathsError> {
        #[cfg(target_os = "macos")]
        {
            let home = dirs::home_dir().ok_or(PathsError::HomeDirUnavailable)?;
            let root = home.join("Library/Application Support").join(APP_DIR_NAME);
            Ok(Self {
                config_dir: root.clone(),
                data_dir: root,
            })
        }

        #[cfg(not(target_os = "macos"))]
        {
            Ok(Self {
                config_dir: dirs::config_dir()
                    .ok_or(PathsError::ConfigDirUnavailable)?
                    .join(APP_DIR_NAME),
                data_dir: dirs::data_dir()
                    .ok_or(PathsError::DataDirUnavailable)?
                    .join(APP_DIR_NAME),
            })
        }
    }

    /// Keep everything under a single root, for embedding hosts and tests.
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("debug.log")
    }

    /// Directory holding the persisted track records.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    /// Live hybrid bundle served to the embedded content host.
    #[must_use]
    pub fn bundle_dir(&self) -> PathBuf {
        self.data_dir.join("hybridApp")
    }

    /// Staging area where bundle archives land before extraction.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join("hybridApp_new")
    }

    /// Whole-bundle archive fetched in development mode.
    #[must_use]
    pub fn development_archive(&self) -> PathBuf {
        self.data_dir.join("hybridApp.zip")
    }

    /// Ensure the config, data and state directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.state_dir())?;
        log::debug!("Ensured sync directories under {}", self.data_dir.display());
        Ok(())
    }
}
