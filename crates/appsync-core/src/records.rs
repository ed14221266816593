//! Persisted value objects for both update tracks.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpgradeKind {
    Optional,
    Mandatory,
}

impl UpgradeKind {
    /// A release declared alongside the unsupported-version flag must be installed.
    #[must_use]
    pub fn from_unsupported_flag(unsupported: bool) -> Self {
        if unsupported {
            Self::Mandatory
        } else {
            Self::Optional
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    #[default]
    NotStarted,
    Downloading,
    DownloadError,
    Downloaded,
}

/// One named, content-hashed archive of the hybrid bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleFileState {
    pub name: String,
    pub content_hash: String,
    pub source_url: String,
    #[serde(default)]
    pub download_state: DownloadState,
    /// Set when the latest manifest no longer lists this file.
    #[serde(default)]
    pub retired: bool,
}

impl BundleFileState {
    #[must_use]
    pub fn new(name: String, content_hash: String, source_url: String) -> Self {
        Self {
            name,
            content_hash,
            source_url,
            download_state: DownloadState::NotStarted,
            retired: false,
        }
    }

    #[must_use]
    pub fn is_downloaded(&self) -> bool {
        self.download_state == DownloadState::Downloaded
    }

    /// Name reported to observers: the archive name without its `.zip` suffix.
    #[must_use]
    pub fn label(&self) -> &str {
        bundle_label(&self.name)
    }
}

#[must_use]
pub fn bundle_label(name: &str) -> &str {
    name.find(".zip").map_or(name, |idx| &name[..idx])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridUpdateState {
    pub upgrade_kind: UpgradeKind,
    pub target_version: String,
    #[serde(default)]
    pub user_acceptance: Option<bool>,
    #[serde(default)]
    pub last_prompt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub downloaded_names: BTreeSet<String>,
    #[serde(default)]
    pub failed_names: BTreeSet<String>,
    #[serde(default)]
    pub download_duration_secs: u64,
    #[serde(default)]
    pub succeeded: bool,
}

impl HybridUpdateState {
    #[must_use]
    pub fn new(upgrade_kind: UpgradeKind, target_version: String) -> Self {
        Self {
            upgrade_kind,
            target_version,
            user_acceptance: None,
            last_prompt_at: None,
            downloaded_names: BTreeSet::new(),
            failed_names: BTreeSet::new(),
            download_duration_secs: 0,
            succeeded: false,
        }
    }

    #[must_use]
    pub fn is_declined_optional(&self) -> bool {
        self.upgrade_kind == UpgradeKind::Optional && self.user_acceptance == Some(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeUpdateState {
    pub upgrade_kind: UpgradeKind,
    pub target_version: String,
    #[serde(default)]
    pub user_acceptance: Option<bool>,
    #[serde(default)]
    pub last_prompt_at: Option<DateTime<Utc>>,
}

impl NativeUpdateState {
    #[must_use]
    pub fn new(upgrade_kind: UpgradeKind, target_version: String) -> Self {
        Self {
            upgrade_kind,
            target_version,
            user_acceptance: None,
            last_prompt_at: None,
        }
    }
}

/// Everything the hybrid track persists between launches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridRecord {
    /// Bundle version currently installed in the live bundle directory.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub files: Vec<BundleFileState>,
    #[serde(default)]
    pub pending: Option<HybridUpdateState>,
    #[serde(default)]
    pub download_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub download_stopped_at: Option<DateTime<Utc>>,
}

/// Whether an optional update may be offered again.
///
/// A prompt that was never recorded counts as long overdue.
#[must_use]
pub fn reprompt_due(
    last_prompt_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> bool {
    last_prompt_at.is_none_or(|last| now.signed_duration_since(last) > interval)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{BundleFileState, DownloadState, UpgradeKind, bundle_label, reprompt_due};

    #[test]
    fn upgrade_kind_follows_unsupported_flag() {
        assert_eq!(UpgradeKind::from_unsupported_flag(true), UpgradeKind::Mandatory);
        assert_eq!(UpgradeKind::from_unsupported_flag(false), UpgradeKind::Optional);
    }

    #[test]
    fn bundle_label_strips_zip_suffix() {
        assert_eq!(bundle_label("core.zip"), "core");
        assert_eq!(bundle_label("assets.zip.a1b2"), "assets");
        assert_eq!(bundle_label("plain"), "plain");
    }

    #[test]
    fn reprompt_due_respects_interval() {
        let declined_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let interval = Duration::days(14);

        assert!(!reprompt_due(Some(declined_at), declined_at + Duration::days(1), interval));
        assert!(!reprompt_due(Some(declined_at), declined_at + Duration::days(14), interval));
        assert!(reprompt_due(Some(declined_at), declined_at + Duration::days(15), interval));
        assert!(reprompt_due(None, declined_at, interval));
    }

    #[test]
    fn bundle_file_record_defaults_missing_fields() {
        let file: BundleFileState = serde_json::from_str(
            r#"{"name":"core.zip","content_hash":"abc","source_url":"https://cdn/core.zip"}"#,
        )
        .expect("record should deserialize");

        assert_eq!(file.download_state, DownloadState::NotStarted);
        assert!(!file.retired);
    }
}
