//! Wire types for `POST /app_sync/check_for_update`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRequest {
    #[serde(rename = "last_sync_timeStamp")]
    pub last_sync_timestamp: String,
    pub hybrid_version: Option<String>,
    pub native_version: String,
    pub platform: String,
    pub platform_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub maintenance_mode: bool,
    #[serde(default)]
    pub native: TrackNode,
    #[serde(default)]
    pub hybrid: TrackNode,
}

impl SyncResponse {
    /// Parse a response body.
    ///
    /// # Errors
    /// Returns an error when the body is not a JSON object of the expected shape.
    pub fn from_slice(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// True when either track declares the client unsupported without
    /// offering a release to move to.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        self.native.is_unsupported() || self.hybrid.is_unsupported()
    }
}

/// The per-track portion of a sync response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrackNode {
    #[serde(default)]
    pub unsupported_version: bool,
    #[serde(default)]
    pub release: Option<ReleaseNode>,
}

impl TrackNode {
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        self.unsupported_version && self.release.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReleaseNode {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub zips: Vec<ZipNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ZipNode {
    pub name: String,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub url: String,
}
