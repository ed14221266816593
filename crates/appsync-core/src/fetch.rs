use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;
use crate::hybrid::BatchItem;

/// Fetches one remote file to a local path.
#[async_trait]
pub trait BundleFetcher: Send + Sync {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpBundleFetcher {
    client: reqwest::Client,
}

impl HttpBundleFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BundleFetcher for HttpBundleFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        use futures_util::StreamExt;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|error| FetchError::io(destination, error))?;
        let mut downloaded: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|error| FetchError::io(destination, error))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|error| FetchError::io(destination, error))?;

        debug!("Fetched {downloaded} bytes to {}", destination.display());
        Ok(())
    }
}

/// Staging location for a bundle file, keyed by its name.
///
/// # Errors
/// Returns an error when the name is not a plain file name.
pub(crate) fn staging_path(staging_dir: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| *n == name && !n.contains(".."))
        .ok_or_else(|| FetchError::InvalidName(name.to_string()))?;
    Ok(staging_dir.join(file_name))
}

/// Fetch a bundle file into staging and check it against its content hash.
pub(crate) async fn stage_bundle_file(
    fetcher: &dyn BundleFetcher,
    item: &BatchItem,
    staging_dir: &Path,
) -> Result<(), FetchError> {
    let path = staging_path(staging_dir, &item.name)?;
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|error| FetchError::io(staging_dir, error))?;

    fetcher.fetch(&item.url, &path).await?;

    if let Err(error) = verify_content_hash(&path, &item.name, &item.content_hash) {
        if let Err(remove_error) = tokio::fs::remove_file(&path).await {
            warn!("Failed to remove rejected {}: {remove_error}", path.display());
        }
        return Err(error);
    }
    info!("Downloaded {}", item.name);
    Ok(())
}

fn verify_content_hash(path: &Path, name: &str, content_hash: &str) -> Result<(), FetchError> {
    if !is_sha256_hex(content_hash) {
        debug!("Content hash of {name} is opaque, skipping verification");
        return Ok(());
    }
    let actual = sha256_file(path)?;
    if actual.eq_ignore_ascii_case(content_hash) {
        return Ok(());
    }
    warn!("Content hash mismatch for {name}");
    Err(FetchError::ChecksumMismatch {
        name: name.to_string(),
        expected: content_hash.to_ascii_lowercase(),
        actual,
    })
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|ch| ch.is_ascii_hexdigit())
}

fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let mut file = std::fs::File::open(path).map_err(|error| FetchError::io(path, error))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| FetchError::io(path, error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
