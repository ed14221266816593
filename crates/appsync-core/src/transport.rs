use async_trait::async_trait;
use log::debug;

use crate::config::SyncConfig;
use crate::error::{BuildError, SyncError};
use crate::protocol::{SyncRequest, SyncResponse};

/// One server round trip.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn check_for_update(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError>;
}

#[derive(Debug, Clone)]
pub struct HttpSyncTransport {
    client: reqwest::Client,
    url: String,
    project_identifier: String,
}

impl HttpSyncTransport {
    #[must_use]
    pub fn new(client: reqwest::Client, config: &SyncConfig) -> Self {
        Self {
            client,
            url: config.check_for_update_url(),
            project_identifier: config.project_identifier.clone(),
        }
    }

    /// Build the HTTP client shared by the transport and the bundle fetcher.
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn client(config: &SyncConfig) -> Result<reqwest::Client, BuildError> {
        reqwest::Client::builder()
            .timeout(config.http_timeout())
            .user_agent(format!("appsync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(BuildError::HttpClient)
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn check_for_update(&self, request: &SyncRequest) -> Result<SyncResponse, SyncError> {
        let response = self
            .client
            .post(&self.url)
            .header("project-identifier", &self.project_identifier)
            .json(request)
            .send()
            .await
            .map_err(|error| SyncError::transport("app sync request failed", error))?;

        let status = response.status();
        if !status.is_success() {
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(SyncError::ServerError {
                status: status.as_u16(),
                body_snippet,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|error| SyncError::transport("failed to read sync response", error))?;
        debug!("Response: {}", String::from_utf8_lossy(&body));
        SyncResponse::from_slice(&body)
            .map_err(|error| SyncError::InvalidResponse(error.to_string()))
    }
}

fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpSyncTransport, response_snippet};
    use crate::config::SyncConfig;

    #[test]
    fn response_snippet_truncates_and_prefixes() {
        assert_eq!(response_snippet("", 10), "");
        assert_eq!(response_snippet("maintenance window", 11), ": maintenance");
    }

    #[test]
    fn transport_targets_check_for_update_endpoint() {
        let config = SyncConfig::new("https://sync.example.com", "demo-project");
        let client = HttpSyncTransport::client(&config).expect("client should build");

        let transport = HttpSyncTransport::new(client, &config);

        assert_eq!(transport.url, "https://sync.example.com/app_sync/check_for_update");
        assert_eq!(transport.project_identifier, "demo-project");
    }
}
