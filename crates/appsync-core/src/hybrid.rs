use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::protocol::{TrackNode, ZipNode};
use crate::records::{
    BundleFileState, DownloadState, HybridRecord, HybridUpdateState, UpgradeKind, reprompt_due,
};

/// One file a download batch has to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub name: String,
    pub url: String,
    pub content_hash: String,
}

/// Where a running batch stands after a file completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    InFlight,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Succeeded,
    Failed,
    /// The host stopped the batch before every file resolved.
    Stopped,
}

/// What observers are told once the hybrid flow concludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AfterSyncReport {
    pub success: bool,
    pub update: Option<HybridUpdateState>,
}

/// Reconciles the hybrid bundle part of a sync response against the locally
/// tracked file manifest.
#[derive(Debug, Clone)]
pub struct HybridTrack {
    record: HybridRecord,
    reprompt_interval: Duration,
}

impl HybridTrack {
    #[must_use]
    pub fn new(record: HybridRecord, reprompt_interval: Duration) -> Self {
        Self {
            record,
            reprompt_interval,
        }
    }

    #[must_use]
    pub fn record(&self) -> &HybridRecord {
        &self.record
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.record.version.as_deref()
    }

    #[must_use]
    pub fn pending(&self) -> Option<&HybridUpdateState> {
        self.record.pending.as_ref()
    }

    #[must_use]
    pub fn files(&self) -> &[BundleFileState] {
        &self.record.files
    }

    #[must_use]
    pub fn file(&self, name: &str) -> Option<&BundleFileState> {
        self.record.files.iter().find(|file| file.name == name)
    }

    fn active_files(&self) -> impl Iterator<Item = &BundleFileState> {
        self.record.files.iter().filter(|file| !file.retired)
    }

    /// Names of the files the current manifest declares.
    #[must_use]
    pub fn active_file_names(&self) -> Vec<String> {
        self.active_files().map(|file| file.name.clone()).collect()
    }

    /// Apply the server's hybrid node and report whether an update is available.
    ///
    /// A declared release always replaces the pending update: a new release
    /// supersedes an unfinished one.
    pub fn reconcile(&mut self, node: &TrackNode, now: DateTime<Utc>) -> bool {
        if let Some(release) = &node.release {
            let kind = UpgradeKind::from_unsupported_flag(node.unsupported_version);
            debug!("Hybrid release {} declared ({kind:?})", release.version);
            self.record.pending = Some(HybridUpdateState::new(kind, release.version.clone()));
            self.reconcile_files(&release.zips);

            if self.all_files_downloaded() {
                if self.record.version.as_deref() != Some(release.version.as_str()) {
                    info!(
                        "Hybrid bundle already holds every file of {}, adopting it",
                        release.version
                    );
                    self.record.version = Some(release.version.clone());
                }
                self.record.pending = None;
            }
        }

        self.is_update_available(now)
    }

    fn reconcile_files(&mut self, zips: &[ZipNode]) {
        for file in &mut self.record.files {
            file.retired = !zips.iter().any(|zip| zip.name == file.name);
        }

        for zip in zips {
            match self.record.files.iter_mut().find(|file| file.name == zip.name) {
                Some(file) => {
                    if file.content_hash != zip.content_hash {
                        debug!("Bundle file {} changed", zip.name);
                        file.content_hash.clone_from(&zip.content_hash);
                        file.download_state = DownloadState::NotStarted;
                    }
                    file.source_url.clone_from(&zip.url);
                }
                None => {
                    debug!("New bundle file {} is available", zip.name);
                    self.record.files.push(BundleFileState::new(
                        zip.name.clone(),
                        zip.content_hash.clone(),
                        zip.url.clone(),
                    ));
                }
            }
        }
    }

    #[must_use]
    pub fn all_files_downloaded(&self) -> bool {
        self.active_files().all(BundleFileState::is_downloaded)
    }

    #[must_use]
    pub fn any_download_pending(&self) -> bool {
        self.active_files()
            .any(|file| file.download_state == DownloadState::Downloading)
    }

    #[must_use]
    pub fn is_update_available(&self, now: DateTime<Utc>) -> bool {
        let Some(pending) = &self.record.pending else {
            return false;
        };
        if self.all_files_downloaded() {
            return false;
        }
        match pending.upgrade_kind {
            UpgradeKind::Mandatory => true,
            UpgradeKind::Optional => {
                pending.user_acceptance != Some(false)
                    || reprompt_due(pending.last_prompt_at, now, self.reprompt_interval)
            }
        }
    }

    /// Record the user's answer to the optional bundle update.
    pub fn record_consent(&mut self, accepted: bool, now: DateTime<Utc>) {
        if let Some(pending) = self.record.pending.as_mut() {
            pending.user_acceptance = Some(accepted);
            pending.last_prompt_at = Some(now);
        }
    }

    /// Forget the installed bundle after the baseline archive replaced it.
    pub fn reset_for_bootstrap(&mut self) {
        self.record.version = None;
        for file in &mut self.record.files {
            file.download_state = DownloadState::NotStarted;
        }
    }

    /// Files left `Downloading` by a process that died mid-batch start over.
    pub fn recover_interrupted(&mut self) -> bool {
        let mut recovered = false;
        for file in &mut self.record.files {
            if file.download_state == DownloadState::Downloading {
                file.download_state = DownloadState::NotStarted;
                recovered = true;
            }
        }
        recovered
    }

    /// Mark every active file that is not yet downloaded as `Downloading` and
    /// return what has to be fetched.
    pub fn begin_batch(&mut self, now: DateTime<Utc>) -> Vec<BatchItem> {
        if let Some(pending) = self.record.pending.as_mut() {
            pending.downloaded_names.clear();
            pending.failed_names.clear();
        }
        self.record.download_started_at = Some(now);
        self.record.download_stopped_at = None;

        self.record
            .files
            .iter_mut()
            .filter(|file| !file.retired && !file.is_downloaded())
            .map(|file| {
                file.download_state = DownloadState::Downloading;
                BatchItem {
                    name: file.name.clone(),
                    url: file.source_url.clone(),
                    content_hash: file.content_hash.clone(),
                }
            })
            .collect()
    }

    pub fn mark_downloaded(&mut self, name: &str) -> BatchStatus {
        self.set_file_state(name, DownloadState::Downloaded);
        self.batch_status()
    }

    pub fn mark_failed(&mut self, name: &str) -> BatchStatus {
        self.set_file_state(name, DownloadState::DownloadError);
        self.batch_status()
    }

    fn set_file_state(&mut self, name: &str, state: DownloadState) {
        let Some(file) = self.record.files.iter_mut().find(|file| file.name == name) else {
            return;
        };
        file.download_state = state;
        let label = file.label().to_string();
        if let Some(pending) = self.record.pending.as_mut() {
            if state == DownloadState::Downloaded {
                pending.failed_names.remove(&label);
                pending.downloaded_names.insert(label);
            } else {
                pending.downloaded_names.remove(&label);
                pending.failed_names.insert(label);
            }
        }
    }

    #[must_use]
    pub fn batch_status(&self) -> BatchStatus {
        if self.any_download_pending() {
            BatchStatus::InFlight
        } else if self.all_files_downloaded() {
            BatchStatus::Complete
        } else {
            BatchStatus::Failed
        }
    }

    /// Files whose completion never arrived are recorded as failed.
    pub fn fail_in_flight(&mut self) -> BatchStatus {
        let stuck: Vec<String> = self
            .active_files()
            .filter(|file| file.download_state == DownloadState::Downloading)
            .map(|file| file.name.clone())
            .collect();
        for name in stuck {
            self.set_file_state(&name, DownloadState::DownloadError);
        }
        self.batch_status()
    }

    pub fn complete_batch(&mut self, outcome: BatchOutcome, now: DateTime<Utc>) {
        self.record.download_stopped_at = Some(now);
        match outcome {
            BatchOutcome::Succeeded => {
                if let Some(pending) = self.record.pending.as_mut() {
                    info!("Hybrid bundle updated to {}", pending.target_version);
                    self.record.version = Some(pending.target_version.clone());
                    pending.succeeded = true;
                }
            }
            BatchOutcome::Failed => {
                info!("Hybrid bundle download failed");
                if let Some(pending) = self.record.pending.as_mut() {
                    pending.succeeded = false;
                }
            }
            BatchOutcome::Stopped => {
                info!("Hybrid bundle download stopped");
                for file in &mut self.record.files {
                    if file.download_state == DownloadState::Downloading {
                        file.download_state = DownloadState::NotStarted;
                    }
                }
                if let Some(pending) = self.record.pending.as_mut() {
                    pending.succeeded = false;
                }
            }
        }
    }

    /// Conclude a hybrid flow: build the observer report and drop the pending
    /// update once it has been applied.
    pub fn take_after_sync_report(&mut self) -> AfterSyncReport {
        let duration = self.download_duration_secs();
        let Some(pending) = self.record.pending.as_mut() else {
            return AfterSyncReport {
                success: true,
                update: None,
            };
        };
        if pending.is_declined_optional() {
            debug!("Optional hybrid update {} declined", pending.target_version);
            return AfterSyncReport {
                success: true,
                update: None,
            };
        }

        pending.download_duration_secs = duration;
        let report = AfterSyncReport {
            success: pending.succeeded,
            update: Some(pending.clone()),
        };
        if pending.succeeded {
            self.record.pending = None;
        }
        report
    }

    fn download_duration_secs(&self) -> u64 {
        match (self.record.download_started_at, self.record.download_stopped_at) {
            (Some(start), Some(stop)) => {
                u64::try_from(stop.signed_duration_since(start).num_seconds()).unwrap_or(0)
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{BatchOutcome, BatchStatus, HybridTrack};
    use crate::protocol::{ReleaseNode, TrackNode, ZipNode};
    use crate::records::{DownloadState, HybridRecord, UpgradeKind};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 8, 30, 0).unwrap()
    }

    fn zip(name: &str, hash: &str) -> ZipNode {
        ZipNode {
            name: name.to_string(),
            content_hash: hash.to_string(),
            url: format!("https://cdn.example.com/{hash}/{name}"),
        }
    }

    fn node(version: &str, unsupported: bool, zips: Vec<ZipNode>) -> TrackNode {
        TrackNode {
            unsupported_version: unsupported,
            release: Some(ReleaseNode {
                version: version.to_string(),
                zips,
            }),
        }
    }

    fn track() -> HybridTrack {
        HybridTrack::new(HybridRecord::default(), Duration::days(14))
    }

    fn three_files() -> Vec<ZipNode> {
        vec![zip("core.zip", "a1"), zip("assets.zip", "b1"), zip("lang.zip", "c1")]
    }

    #[test]
    fn new_files_start_not_started() {
        let mut track = track();

        assert!(track.reconcile(&node("10", true, three_files()), t0()));

        assert_eq!(track.files().len(), 3);
        assert!(
            track
                .files()
                .iter()
                .all(|file| file.download_state == DownloadState::NotStarted)
        );
        assert_eq!(
            track.pending().map(|pending| pending.upgrade_kind),
            Some(UpgradeKind::Mandatory)
        );
    }

    #[test]
    fn reconcile_twice_is_idempotent() {
        let mut track = track();
        track.reconcile(&node("10", false, three_files()), t0());
        let first = track.record().clone();

        track.reconcile(&node("10", false, three_files()), t0());

        assert_eq!(track.record(), &first);
    }

    #[test]
    fn changed_hash_resets_download_state() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.begin_batch(t0());
        track.mark_downloaded("core.zip");
        track.mark_failed("assets.zip");

        track.reconcile(
            &node(
                "11",
                true,
                vec![zip("core.zip", "a2"), zip("assets.zip", "b2"), zip("lang.zip", "c1")],
            ),
            t0(),
        );

        let core = track.file("core.zip").expect("core should be tracked");
        assert_eq!(core.download_state, DownloadState::NotStarted);
        assert_eq!(core.content_hash, "a2");
        assert_eq!(
            track.file("assets.zip").map(|file| file.download_state),
            Some(DownloadState::NotStarted)
        );
        assert_eq!(
            track.file("lang.zip").map(|file| file.download_state),
            Some(DownloadState::Downloading)
        );
    }

    #[test]
    fn unchanged_hash_keeps_state_and_refreshes_url() {
        let mut track = track();
        track.reconcile(&node("10", true, vec![zip("core.zip", "a1")]), t0());
        track.begin_batch(t0());
        track.mark_failed("core.zip");

        let mut refreshed = zip("core.zip", "a1");
        refreshed.url = "https://cdn.example.com/signed?sig=2".to_string();
        track.reconcile(&node("10", true, vec![refreshed]), t0());

        let core = track.file("core.zip").expect("core should be tracked");
        assert_eq!(core.download_state, DownloadState::DownloadError);
        assert_eq!(core.source_url, "https://cdn.example.com/signed?sig=2");
    }

    #[test]
    fn mandatory_stays_available_until_all_downloaded() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.record_consent(false, t0());
        assert!(track.is_update_available(t0()));

        track.begin_batch(t0());
        track.mark_downloaded("core.zip");
        track.mark_downloaded("assets.zip");
        assert!(track.is_update_available(t0()));

        track.mark_downloaded("lang.zip");
        assert!(!track.is_update_available(t0()));
    }

    #[test]
    fn declined_optional_waits_for_reprompt_interval() {
        let mut track = track();
        assert!(track.reconcile(&node("10", false, three_files()), t0()));

        track.record_consent(false, t0());

        assert!(!track.is_update_available(t0() + Duration::days(1)));
        assert!(track.is_update_available(t0() + Duration::days(15)));
    }

    #[test]
    fn fully_downloaded_release_is_adopted_and_cleared() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.begin_batch(t0());
        for name in ["core.zip", "assets.zip", "lang.zip"] {
            track.mark_downloaded(name);
        }

        assert!(!track.reconcile(&node("10", true, three_files()), t0()));

        assert_eq!(track.version(), Some("10"));
        assert!(track.pending().is_none());
    }

    #[test]
    fn retired_files_are_kept_but_not_fetched() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());

        track.reconcile(&node("11", true, vec![zip("core.zip", "a1")]), t0());

        assert_eq!(track.files().len(), 3);
        assert!(track.file("lang.zip").is_some_and(|file| file.retired));
        let items = track.begin_batch(t0());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "core.zip");
    }

    #[test]
    fn two_of_three_failing_resolves_as_failure() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.begin_batch(t0());

        assert_eq!(track.mark_downloaded("core.zip"), BatchStatus::InFlight);
        assert_eq!(track.mark_failed("assets.zip"), BatchStatus::InFlight);
        assert_eq!(track.mark_downloaded("lang.zip"), BatchStatus::Failed);

        track.complete_batch(BatchOutcome::Failed, t0() + Duration::seconds(12));
        let report = track.take_after_sync_report();

        assert!(!report.success);
        let update = report.update.expect("update should be reported");
        assert_eq!(update.downloaded_names.len(), 2);
        assert_eq!(update.failed_names.len(), 1);
        assert!(update.failed_names.contains("assets"));
        assert_eq!(update.download_duration_secs, 12);
        assert!(track.version().is_none());
        assert!(track.pending().is_some());
    }

    #[test]
    fn successful_batch_advances_version_and_clears_pending() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.begin_batch(t0());
        track.mark_downloaded("core.zip");
        track.mark_downloaded("assets.zip");
        assert_eq!(track.mark_downloaded("lang.zip"), BatchStatus::Complete);

        track.complete_batch(BatchOutcome::Succeeded, t0());
        let report = track.take_after_sync_report();

        assert!(report.success);
        assert!(report.update.is_some_and(|update| update.succeeded));
        assert_eq!(track.version(), Some("10"));
        assert!(track.pending().is_none());
    }

    #[test]
    fn stopped_batch_is_a_failure_and_restarts_in_flight_files() {
        let mut track = track();
        track.reconcile(&node("10", true, three_files()), t0());
        track.begin_batch(t0());
        track.mark_downloaded("core.zip");

        track.complete_batch(BatchOutcome::Stopped, t0());

        assert_eq!(
            track.file("assets.zip").map(|file| file.download_state),
            Some(DownloadState::NotStarted)
        );
        assert!(!track.take_after_sync_report().success);
        assert!(track.version().is_none());
    }

    #[test]
    fn declined_optional_reports_plain_success() {
        let mut track = track();
        track.reconcile(&node("10", false, three_files()), t0());
        track.record_consent(false, t0());

        let report = track.take_after_sync_report();

        assert!(report.success);
        assert!(report.update.is_none());
        assert!(track.pending().is_some());
    }

    #[test]
    fn bootstrap_reset_forgets_version_and_downloads() {
        let mut track = track();
        track.reconcile(&node("10", true, vec![zip("core.zip", "a1")]), t0());
        track.begin_batch(t0());
        track.mark_downloaded("core.zip");
        track.complete_batch(BatchOutcome::Succeeded, t0());

        track.reset_for_bootstrap();

        assert!(track.version().is_none());
        assert_eq!(
            track.file("core.zip").map(|file| file.download_state),
            Some(DownloadState::NotStarted)
        );
    }
}
