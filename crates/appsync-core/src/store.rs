use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::records::{HybridRecord, NativeUpdateState};

const NATIVE_SYNC_FILE: &str = "native_sync.json";
const HYBRID_SYNC_FILE: &str = "hybrid_sync.json";
const APP_INFO_FILE: &str = "app_info.json";

/// Host facts remembered across launches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Native version seen by the last bundle bootstrap.
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// JSON record files under one directory, one file per record type.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// # Errors
    /// Returns an error if the record exists but cannot be read or parsed.
    pub fn load_native(&self) -> Result<Option<NativeUpdateState>, StoreError> {
        self.load(NATIVE_SYNC_FILE)
    }

    /// # Errors
    /// Returns an error if the record cannot be written.
    pub fn save_native(&self, state: Option<&NativeUpdateState>) -> Result<(), StoreError> {
        self.save(NATIVE_SYNC_FILE, "native update state", &state)
    }

    /// # Errors
    /// Returns an error if the record exists but cannot be read or parsed.
    pub fn load_hybrid(&self) -> Result<Option<HybridRecord>, StoreError> {
        self.load(HYBRID_SYNC_FILE)
    }

    /// # Errors
    /// Returns an error if the record cannot be written.
    pub fn save_hybrid(&self, record: &HybridRecord) -> Result<(), StoreError> {
        self.save(HYBRID_SYNC_FILE, "hybrid sync record", record)
    }

    /// # Errors
    /// Returns an error if the record exists but cannot be read or parsed.
    pub fn load_app_info(&self) -> Result<Option<AppInfo>, StoreError> {
        self.load(APP_INFO_FILE)
    }

    /// # Errors
    /// Returns an error if the record cannot be written.
    pub fn save_app_info(&self, info: &AppInfo) -> Result<(), StoreError> {
        self.save(APP_INFO_FILE, "app info", info)
    }

    fn load<T: DeserializeOwned>(&self, file_name: &str) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(file_name);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(StoreError::io(&path, error)),
        };
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<T>>(&data)
            .map_err(|error| StoreError::deserialize(&path, error))
    }

    fn save<T: Serialize>(
        &self,
        file_name: &str,
        record: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|source| StoreError::Serialize { record, source })?;
        std::fs::create_dir_all(&self.dir).map_err(|error| StoreError::io(&self.dir, error))?;
        let path = self.dir.join(file_name);
        write_atomic(&path, &data).map_err(|error| StoreError::io(&path, error))?;
        debug!("Saved {record} to {}", path.display());
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "record path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("record");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique record temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}
