//! Update reconciliation and download orchestration for hybrid apps.
//!
//! A client ships two independently versioned parts: the installable native
//! application and a server-distributed hybrid content bundle. This crate
//! keeps both in step with the sync backend:
//! - Native and hybrid track reconciliation with re-prompt cadence.
//! - Durable track records that survive process restarts.
//! - Content-addressed, incremental bundle downloads with partial-failure
//!   aggregation.
//! - A single-flight sync orchestrator that fans outcomes out to observers.

pub mod archive;
mod app_sync;
mod config;
mod download;
mod error;
mod fetch;
mod guard;
pub mod host;
mod hybrid;
mod native;
mod observer;
pub mod protocol;
pub mod records;
mod store;
mod transport;

/// Engine handle, builder and sync outcome.
pub use app_sync::{AppSync, AppSyncBuilder, SyncOutcome};
/// Engine configuration loaded from the host's settings.
pub use config::SyncConfig;
/// Error types for sync attempts, persistence, fetches and configuration.
pub use error::{BuildError, ConfigError, FetchError, StoreError, SyncError};
/// Bundle file fetch collaborator and its reqwest implementation.
pub use fetch::{BundleFetcher, HttpBundleFetcher};
/// Single-flight guard primitives.
pub use guard::{SyncGuard, SyncTicket};
/// Hybrid track reconciliation and download batch bookkeeping.
pub use hybrid::{AfterSyncReport, BatchItem, BatchOutcome, BatchStatus, HybridTrack};
/// Native track reconciliation.
pub use native::NativeTrack;
/// Observer registry and the consent handle passed to observers.
pub use observer::{ConsentRequest, ObserverId, ObserverRegistry, SyncObserver};
/// Persisted record store.
pub use store::{AppInfo, StateStore};
/// Server round-trip collaborator and its reqwest implementation.
pub use transport::{HttpSyncTransport, SyncTransport};
