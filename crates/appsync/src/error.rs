use appsync_core::{BuildError, ConfigError, SyncError};
use appsync_platform::PathsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Paths(#[from] PathsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write default settings to {path}: {source}")]
    WriteSettings {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("sync did not finish within {0}s")]
    Timeout(u64),
}
