use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use appsync_platform::{PlatformInfo, SyncPaths};
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::archive::{self, ArchiveSource};
use crate::config::SyncConfig;
use crate::error::{BuildError, StoreError, SyncError};
use crate::fetch::{BundleFetcher, HttpBundleFetcher};
use crate::guard::{SyncGuard, SyncTicket};
use crate::host::{
    DeviceIdentity, NativeFlowOutcome, NativeUpdateFlow, NoDeviceIdentity, NoNativeUpdateFlow,
    NoPushToken, PushTokenSource,
};
use crate::hybrid::HybridTrack;
use crate::native::NativeTrack;
use crate::observer::{ConsentRequest, ObserverId, ObserverRegistry, SyncObserver};
use crate::protocol::{SyncRequest, SyncResponse, TrackNode};
use crate::records::{HybridRecord, HybridUpdateState, NativeUpdateState, UpgradeKind};
use crate::store::{AppInfo, StateStore};
use crate::transport::{HttpSyncTransport, SyncTransport};

/// Track snapshots taken right after a successful round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub native: Option<NativeUpdateState>,
    pub hybrid: Option<HybridUpdateState>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner {
    pub(crate) config: SyncConfig,
    pub(crate) paths: SyncPaths,
    platform: PlatformInfo,
    native_version: String,
    pub(crate) store: StateStore,
    transport: Arc<dyn SyncTransport>,
    pub(crate) fetcher: Arc<dyn BundleFetcher>,
    identity: Arc<dyn DeviceIdentity>,
    push_tokens: Arc<dyn PushTokenSource>,
    native_flow: Arc<dyn NativeUpdateFlow>,
    pub(crate) observers: ObserverRegistry,
    guard: SyncGuard,
    native: Mutex<NativeTrack>,
    pub(crate) hybrid: Mutex<HybridTrack>,
    app_info: Mutex<AppInfo>,
    pub(crate) active_batch: Mutex<Option<CancellationToken>>,
    pub(crate) runtime: Handle,
    development_bundle_installed: AtomicBool,
}

/// Handle to the sync engine. Clones share the same engine.
///
/// A sync attempt holds the single-flight guard from the server round trip
/// until the last step of its flow resolves: an immediate no-op, an error,
/// the host's native install flow, a consent answer or a finished download
/// batch.
#[derive(Clone)]
pub struct AppSync {
    inner: Arc<Inner>,
}

impl AppSync {
    #[must_use]
    pub fn builder(config: SyncConfig, paths: SyncPaths) -> AppSyncBuilder {
        AppSyncBuilder::new(config, paths)
    }

    /// Run one sync attempt.
    ///
    /// Returns once the server response has been applied to both tracks.
    /// Bundle downloads and consent prompts continue in the background and
    /// end with an `after_sync` notification.
    ///
    /// # Errors
    /// Returns `InProgress` without any network call while another attempt
    /// holds the guard, or the error that ended this attempt.
    pub async fn sync(&self) -> Result<SyncOutcome, SyncError> {
        let Some(ticket) = self.inner.guard.try_acquire() else {
            debug!("Sync requested while another attempt is running");
            return Err(SyncError::InProgress);
        };

        if self.inner.config.development_mode {
            return self.inner.sync_development_bundle().await;
        }

        let request = self.inner.build_request().await;
        debug!(
            "Checking for updates (native {}, hybrid {:?})",
            request.native_version, request.hybrid_version
        );
        let response = self.inner.transport.check_for_update(&request).await?;
        self.inner.apply_response(&response, ticket)
    }

    /// Reconcile a hybrid release pushed by the server and act on it like a
    /// sync would. Returns whether an update is available.
    ///
    /// # Errors
    /// Returns `InProgress` while another attempt holds the guard,
    /// `UnsupportedVersion` for an unsupported node without a release, or a
    /// store error when the reconciled record cannot be saved.
    pub fn handle_pushed_hybrid_release(&self, node: &TrackNode) -> Result<bool, SyncError> {
        let Some(ticket) = self.inner.guard.try_acquire() else {
            return Err(SyncError::InProgress);
        };
        if node.is_unsupported() {
            warn!("Pushed hybrid release declares this version unsupported");
            return Err(SyncError::UnsupportedVersion);
        }

        let available = self
            .inner
            .update_hybrid(|hybrid| hybrid.reconcile(node, Utc::now()))?;
        info!("Pushed hybrid release reconciled (update available: {available})");
        self.inner.check_for_and_handle_hybrid_update(ticket);
        Ok(available)
    }

    /// Act on a hybrid update that a sync reconciled but left alone because
    /// `auto_hybrid_update` is off.
    ///
    /// # Errors
    /// Returns `InProgress` while another attempt holds the guard.
    pub fn apply_pending_hybrid_update(&self) -> Result<(), SyncError> {
        let Some(ticket) = self.inner.guard.try_acquire() else {
            return Err(SyncError::InProgress);
        };
        self.inner.check_for_and_handle_hybrid_update(ticket);
        Ok(())
    }

    /// Record the user's answer to the native update dialog, for hosts that
    /// report it outside of [`NativeUpdateFlow`].
    ///
    /// # Errors
    /// Returns an error if the native record cannot be saved.
    pub fn native_dialog_responded(&self, accepted: bool) -> Result<(), StoreError> {
        self.inner.record_native_response(accepted)
    }

    /// Stop the running download batch. Returns `false` when none is running.
    pub fn stop_download(&self) -> bool {
        match lock(&self.inner.active_batch).as_ref() {
            Some(token) => {
                info!("Stopping bundle download");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn register_observer(
        &self,
        context: impl Into<String>,
        observer: Arc<dyn SyncObserver>,
    ) -> ObserverId {
        self.inner.observers.register(context, observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.unregister(id)
    }

    pub fn unregister_context(&self, context: &str) -> usize {
        self.inner.observers.unregister_context(context)
    }

    #[must_use]
    pub fn is_sync_in_progress(&self) -> bool {
        self.inner.guard.is_held()
    }

    #[must_use]
    pub fn native_state(&self) -> Option<NativeUpdateState> {
        lock(&self.inner.native).state().cloned()
    }

    #[must_use]
    pub fn hybrid_update(&self) -> Option<HybridUpdateState> {
        lock(&self.inner.hybrid).pending().cloned()
    }

    #[must_use]
    pub fn hybrid_version(&self) -> Option<String> {
        lock(&self.inner.hybrid).version().map(str::to_string)
    }

    /// Full hybrid record, including every tracked bundle file.
    #[must_use]
    pub fn hybrid_record(&self) -> HybridRecord {
        lock(&self.inner.hybrid).record().clone()
    }

    /// Directory the live hybrid bundle is served from.
    #[must_use]
    pub fn bundle_dir(&self) -> PathBuf {
        self.inner.paths.bundle_dir()
    }
}

pub struct AppSyncBuilder {
    config: SyncConfig,
    paths: SyncPaths,
    native_version: Option<String>,
    platform: Option<PlatformInfo>,
    transport: Option<Arc<dyn SyncTransport>>,
    fetcher: Option<Arc<dyn BundleFetcher>>,
    identity: Arc<dyn DeviceIdentity>,
    push_tokens: Arc<dyn PushTokenSource>,
    native_flow: Arc<dyn NativeUpdateFlow>,
    baseline: Option<ArchiveSource>,
}

impl AppSyncBuilder {
    fn new(config: SyncConfig, paths: SyncPaths) -> Self {
        Self {
            config,
            paths,
            native_version: None,
            platform: None,
            transport: None,
            fetcher: None,
            identity: Arc::new(NoDeviceIdentity),
            push_tokens: Arc::new(NoPushToken),
            native_flow: Arc::new(NoNativeUpdateFlow),
            baseline: None,
        }
    }

    /// Version of the installed native application. Required.
    #[must_use]
    pub fn native_version(mut self, version: impl Into<String>) -> Self {
        self.native_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn platform(mut self, platform: PlatformInfo) -> Self {
        self.platform = Some(platform);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn BundleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn device_identity(mut self, identity: Arc<dyn DeviceIdentity>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn push_tokens(mut self, push_tokens: Arc<dyn PushTokenSource>) -> Self {
        self.push_tokens = push_tokens;
        self
    }

    #[must_use]
    pub fn native_update_flow(mut self, native_flow: Arc<dyn NativeUpdateFlow>) -> Self {
        self.native_flow = native_flow;
        self
    }

    /// Archive restored as the live bundle whenever the native version changes.
    #[must_use]
    pub fn baseline_archive(mut self, baseline: ArchiveSource) -> Self {
        self.baseline = Some(baseline);
        self
    }

    /// Load persisted state, bootstrap the baseline bundle if needed and
    /// return the engine.
    ///
    /// # Errors
    /// Returns an error outside a tokio runtime, without a native version,
    /// when the HTTP client cannot be built or when the data directories or
    /// records cannot be written.
    pub fn build(self) -> Result<AppSync, BuildError> {
        let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;
        let native_version = self
            .native_version
            .ok_or(BuildError::MissingCollaborator("native version"))?;

        let (transport, fetcher): (Arc<dyn SyncTransport>, Arc<dyn BundleFetcher>) =
            match (self.transport, self.fetcher) {
                (Some(transport), Some(fetcher)) => (transport, fetcher),
                (transport, fetcher) => {
                    let client = HttpSyncTransport::client(&self.config)?;
                    let transport = transport.unwrap_or_else(|| {
                        Arc::new(HttpSyncTransport::new(client.clone(), &self.config))
                    });
                    let fetcher =
                        fetcher.unwrap_or_else(|| Arc::new(HttpBundleFetcher::new(client)));
                    (transport, fetcher)
                }
            };

        self.paths
            .ensure_dirs()
            .map_err(|error| StoreError::io(&self.paths.data_dir, error))?;
        let store = StateStore::new(self.paths.state_dir());
        let reprompt_interval = self.config.reprompt_interval();

        let native = NativeTrack::new(
            load_or_default("native update state", store.load_native()),
            reprompt_interval,
        );
        let mut hybrid = HybridTrack::new(
            load_or_default("hybrid update state", store.load_hybrid()).unwrap_or_default(),
            reprompt_interval,
        );
        if hybrid.recover_interrupted() {
            info!("Restarting bundle downloads interrupted by the previous run");
            store.save_hybrid(hybrid.record())?;
        }
        let app_info = load_or_default("app info", store.load_app_info()).unwrap_or_default();

        let inner = Arc::new(Inner {
            config: self.config,
            paths: self.paths,
            platform: self.platform.unwrap_or_else(PlatformInfo::detect),
            native_version,
            store,
            transport,
            fetcher,
            identity: self.identity,
            push_tokens: self.push_tokens,
            native_flow: self.native_flow,
            observers: ObserverRegistry::new(),
            guard: SyncGuard::new(),
            native: Mutex::new(native),
            hybrid: Mutex::new(hybrid),
            app_info: Mutex::new(app_info),
            active_batch: Mutex::new(None),
            runtime,
            development_bundle_installed: AtomicBool::new(false),
        });
        inner.bootstrap(self.baseline.as_ref())?;
        inner.recover_staged();

        Ok(AppSync { inner })
    }
}

fn load_or_default<T>(record: &str, loaded: Result<Option<T>, StoreError>) -> Option<T> {
    loaded.unwrap_or_else(|error| {
        warn!("Discarding unreadable {record}: {error}");
        None
    })
}

fn remove_dir_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(StoreError::io(path, error)),
    }
}

async fn best_effort<F>(what: &str, timeout: Duration, provider: F) -> Option<String>
where
    F: Future<Output = Option<String>>,
{
    tokio::time::timeout(timeout, provider)
        .await
        .unwrap_or_else(|_| {
            warn!("Timed out obtaining {what}, sending the request without it");
            None
        })
}

impl Inner {
    /// Apply `change` to the hybrid track and save the record while the lock
    /// is still held.
    pub(crate) fn update_hybrid<T>(
        &self,
        change: impl FnOnce(&mut HybridTrack) -> T,
    ) -> Result<T, StoreError> {
        let mut hybrid = lock(&self.hybrid);
        let value = change(&mut hybrid);
        self.store.save_hybrid(hybrid.record())?;
        Ok(value)
    }

    fn bootstrap(&self, baseline: Option<&ArchiveSource>) -> Result<(), StoreError> {
        let mut app_info = lock(&self.app_info);
        if app_info.app_version.as_deref() == Some(self.native_version.as_str()) {
            return Ok(());
        }

        info!(
            "Native version {} first seen, restoring the baseline bundle",
            self.native_version
        );
        let bundle_dir = self.paths.bundle_dir();
        remove_dir_if_exists(&bundle_dir)?;
        remove_dir_if_exists(&self.paths.staging_dir())?;
        self.update_hybrid(HybridTrack::reset_for_bootstrap)?;

        match baseline {
            Some(baseline) => {
                if !archive::extract(baseline, &bundle_dir) {
                    warn!("Baseline bundle could not be extracted, retrying on next launch");
                    return Ok(());
                }
            }
            None => debug!("No baseline bundle configured"),
        }

        app_info.app_version = Some(self.native_version.clone());
        self.store.save_app_info(&app_info)
    }

    async fn build_request(&self) -> SyncRequest {
        let timeout = self.config.provider_timeout();
        let (device_identifier, notification_token) = tokio::join!(
            best_effort("device identifier", timeout, self.identity.device_identifier()),
            best_effort(
                "notification token",
                timeout,
                self.push_tokens.notification_token()
            ),
        );

        let last_sync_timestamp = lock(&self.app_info)
            .last_sync_at
            .map_or_else(|| "0".to_string(), |at| at.timestamp_millis().to_string());
        let hybrid_version = lock(&self.hybrid).version().map(str::to_string);

        SyncRequest {
            last_sync_timestamp,
            hybrid_version,
            native_version: self.native_version.clone(),
            platform: self.platform.platform.clone(),
            platform_version: self.platform.platform_version.clone(),
            device_identifier,
            notification_token,
        }
    }

    fn apply_response(
        self: &Arc<Self>,
        response: &SyncResponse,
        ticket: SyncTicket,
    ) -> Result<SyncOutcome, SyncError> {
        if response.maintenance_mode {
            warn!("Sync server is in maintenance mode");
            return Err(SyncError::MaintenanceMode);
        }
        if response.is_unsupported() {
            warn!("Sync server no longer supports this version");
            return Err(SyncError::UnsupportedVersion);
        }

        let now = Utc::now();
        {
            let mut app_info = lock(&self.app_info);
            app_info.last_sync_at = Some(now);
            self.store.save_app_info(&app_info)?;
        }

        let native_needs_action = {
            let mut native = lock(&self.native);
            let needs_action = native.reconcile(&response.native, now);
            self.store.save_native(native.state())?;
            needs_action
        };
        let hybrid_available =
            self.update_hybrid(|hybrid| hybrid.reconcile(&response.hybrid, now))?;
        debug!(
            "Sync applied (native needs action: {native_needs_action}, hybrid update available: {hybrid_available})"
        );

        let outcome = SyncOutcome {
            native: lock(&self.native).state().cloned(),
            hybrid: lock(&self.hybrid).pending().cloned(),
        };

        if native_needs_action && !self.config.disable_native_update {
            self.start_native_flow(ticket);
        } else if self.config.auto_hybrid_update {
            self.check_for_and_handle_hybrid_update(ticket);
        } else {
            debug!("Leaving the hybrid track for the host to apply");
            ticket.release();
        }
        Ok(outcome)
    }

    fn start_native_flow(self: &Arc<Self>, ticket: SyncTicket) {
        let Some(kind) = lock(&self.native).upgrade_kind() else {
            self.continue_with_hybrid(ticket);
            return;
        };

        info!("Starting native update flow ({kind:?})");
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = inner.native_flow.start_update_flow(kind).await;
            inner.after_native_flow(kind, outcome, ticket);
        });
    }

    fn after_native_flow(
        self: &Arc<Self>,
        kind: UpgradeKind,
        outcome: NativeFlowOutcome,
        ticket: SyncTicket,
    ) {
        debug!("Native update flow ended with {outcome:?}");
        match outcome {
            NativeFlowOutcome::ImmediateUpdateStarted | NativeFlowOutcome::Installing => {
                info!("Native {kind:?} update is being installed");
                ticket.release();
            }
            NativeFlowOutcome::Downloaded => {
                self.observers.notify_native_update_downloaded();
                self.continue_with_hybrid(ticket);
            }
            NativeFlowOutcome::Prompted { accepted } => {
                if let Err(error) = self.record_native_response(accepted) {
                    error!("Failed to save native dialog response: {error}");
                }
                self.continue_with_hybrid(ticket);
            }
            NativeFlowOutcome::Unavailable => self.continue_with_hybrid(ticket),
        }
    }

    fn continue_with_hybrid(self: &Arc<Self>, ticket: SyncTicket) {
        if self.config.auto_hybrid_update {
            self.check_for_and_handle_hybrid_update(ticket);
        } else {
            ticket.release();
        }
    }

    fn record_native_response(&self, accepted: bool) -> Result<(), StoreError> {
        {
            let mut native = lock(&self.native);
            native.record_dialog_response(accepted, Utc::now());
            self.store.save_native(native.state())?;
        }
        self.observers.notify_native_dialog_responded(accepted);
        Ok(())
    }

    pub(crate) fn check_for_and_handle_hybrid_update(self: &Arc<Self>, ticket: SyncTicket) {
        let (available, pending) = {
            let hybrid = lock(&self.hybrid);
            (
                hybrid.is_update_available(Utc::now()),
                hybrid.pending().cloned(),
            )
        };

        match pending {
            Some(pending) if available => match pending.upgrade_kind {
                UpgradeKind::Optional => self.request_hybrid_consent(pending.target_version, ticket),
                UpgradeKind::Mandatory => self.start_batch(ticket),
            },
            _ => {
                self.handle_after_sync_event();
                ticket.release();
            }
        }
    }

    fn request_hybrid_consent(self: &Arc<Self>, target_version: String, ticket: SyncTicket) {
        info!("Asking for consent to hybrid update {target_version}");
        if self.observers.is_empty() {
            debug!("No observer registered, consent request will be dismissed");
        }

        let inner = Arc::clone(self);
        let consent = ConsentRequest::new(target_version, move |answer| {
            inner.resolve_consent(answer, ticket);
        });
        self.observers.request_consent(&consent);
    }

    fn resolve_consent(self: &Arc<Self>, answer: Option<bool>, ticket: SyncTicket) {
        let Some(accepted) = answer else {
            info!("Hybrid update consent dismissed");
            self.handle_after_sync_event();
            ticket.release();
            return;
        };

        info!("Hybrid update consent answered: {accepted}");
        if let Err(error) = self.update_hybrid(|hybrid| hybrid.record_consent(accepted, Utc::now()))
        {
            error!("Failed to save hybrid consent: {error}");
            self.observers.notify_after_sync(false, None);
            ticket.release();
            return;
        }

        if accepted {
            self.start_batch(ticket);
        } else {
            self.handle_after_sync_event();
            ticket.release();
        }
    }

    /// Conclude the hybrid flow: persist and fan the report out to observers.
    pub(crate) fn handle_after_sync_event(&self) {
        let (report, saved) = {
            let mut hybrid = lock(&self.hybrid);
            let report = hybrid.take_after_sync_report();
            (report, self.store.save_hybrid(hybrid.record()))
        };

        match saved {
            Ok(()) => self
                .observers
                .notify_after_sync(report.success, report.update.as_ref()),
            Err(error) => {
                error!("Failed to save hybrid state: {error}");
                self.observers.notify_after_sync(false, report.update.as_ref());
            }
        }
    }

    async fn sync_development_bundle(&self) -> Result<SyncOutcome, SyncError> {
        if self.development_bundle_installed.load(Ordering::Acquire) {
            debug!("Development bundle already installed this session");
            self.observers.notify_after_sync(true, None);
            return Ok(SyncOutcome::default());
        }

        let archive_path = self.paths.development_archive();
        info!("Downloading development bundle from {}", self.config.server_url);
        self.fetcher
            .fetch(&self.config.server_url, &archive_path)
            .await
            .map_err(|error| SyncError::transport("download development bundle", error))?;

        let bundle_dir = self.paths.bundle_dir();
        let extracted = tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            remove_dir_if_exists(&bundle_dir)?;
            Ok(archive::extract(&ArchiveSource::File(archive_path), &bundle_dir))
        })
        .await
        .map_err(|error| SyncError::Bundle(error.to_string()))??;

        if !extracted {
            return Err(SyncError::Bundle(
                "development bundle could not be extracted".to_string(),
            ));
        }

        self.development_bundle_installed
            .store(true, Ordering::Release);
        info!("Development bundle installed");
        self.observers.notify_after_sync(true, None);
        Ok(SyncOutcome::default())
    }
}
