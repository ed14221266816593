use std::path::Path;

use thiserror::Error;

/// Failure of one sync attempt.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already in progress")]
    InProgress,
    #[error("{context}: {details}")]
    Transport {
        context: &'static str,
        details: String,
    },
    #[error("sync request failed with HTTP {status}{body_snippet}")]
    ServerError { status: u16, body_snippet: String },
    #[error("failed to parse sync response: {0}")]
    InvalidResponse(String),
    #[error("server is in maintenance mode")]
    MaintenanceMode,
    #[error("installed version is no longer supported")]
    UnsupportedVersion,
    #[error("failed to install bundle: {0}")]
    Bundle(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn transport<E>(context: &'static str, error: E) -> Self
    where
        E: std::fmt::Display,
    {
        Self::Transport {
            context,
            details: error.to_string(),
        }
    }
}

/// Failure to read or write a persisted record.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {record}: {source}")]
    Serialize {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Deserialize {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn deserialize(path: &Path, source: serde_json::Error) -> Self {
        Self::Deserialize {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Failure of a single bundle file fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download failed with HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("content hash mismatch for {name}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("refusing to stage bundle file with unsafe name '{0}'")]
    InvalidName(String),
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings from {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("sync engine must be built inside a tokio runtime")]
    NoRuntime,
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}
