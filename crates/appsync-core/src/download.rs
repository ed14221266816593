//! Background download batch for the hybrid bundle.
//!
//! One task per stale file fetches into the staging directory. Completions
//! are joined in a single loop that updates the hybrid record under its lock,
//! so exactly one completion observes the batch as resolved.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::app_sync::{Inner, lock};
use crate::archive::{self, ArchiveSource};
use crate::error::FetchError;
use crate::fetch::{stage_bundle_file, staging_path};
use crate::guard::SyncTicket;
use crate::hybrid::{BatchOutcome, BatchStatus, HybridTrack};
use crate::records::BundleFileState;

impl Inner {
    /// Run the download batch in the background. The ticket is released once
    /// the batch has been resolved and observers were told.
    pub(crate) fn start_batch(self: &Arc<Self>, ticket: SyncTicket) {
        let token = CancellationToken::new();
        *lock(&self.active_batch) = Some(token.clone());

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = inner.run_batch(&token).await;
            lock(&inner.active_batch).take();
            inner.finish_batch(outcome);
            ticket.release();
        });
    }

    async fn run_batch(self: &Arc<Self>, token: &CancellationToken) -> BatchOutcome {
        let items = match self.update_hybrid(|hybrid| hybrid.begin_batch(Utc::now())) {
            Ok(items) => items,
            Err(error) => {
                error!("Failed to save hybrid state before downloading: {error}");
                return BatchOutcome::Failed;
            }
        };

        let status = if items.is_empty() {
            self.batch_status()
        } else {
            info!("Downloading {} bundle file(s)", items.len());
            let staging_dir = self.paths.staging_dir();
            let mut tasks = JoinSet::new();
            for item in items {
                let fetcher = Arc::clone(&self.fetcher);
                let staging_dir = staging_dir.clone();
                tasks.spawn(async move {
                    let result = stage_bundle_file(fetcher.as_ref(), &item, &staging_dir).await;
                    (item.name, result)
                });
            }

            match self.join_downloads(&mut tasks, token).await {
                Some(status) => status,
                None => return BatchOutcome::Stopped,
            }
        };

        match status {
            BatchStatus::Complete => {
                let inner = Arc::clone(self);
                tokio::task::spawn_blocking(move || inner.extract_staged())
                    .await
                    .unwrap_or_else(|error| {
                        error!("Bundle extraction task failed: {error}");
                        BatchOutcome::Failed
                    })
            }
            BatchStatus::Failed | BatchStatus::InFlight => BatchOutcome::Failed,
        }
    }

    /// Join file completions until the batch resolves. Returns `None` when the
    /// batch was stopped; in-flight fetches are abandoned.
    async fn join_downloads(
        &self,
        tasks: &mut JoinSet<(String, Result<(), FetchError>)>,
        token: &CancellationToken,
    ) -> Option<BatchStatus> {
        loop {
            tokio::select! {
                () = token.cancelled() => {
                    info!("Bundle download stopped with {} file(s) in flight", tasks.len());
                    tasks.abort_all();
                    return None;
                }
                joined = tasks.join_next() => {
                    let saved = match joined {
                        None => self.update_hybrid(HybridTrack::fail_in_flight),
                        Some(Ok((name, Ok(())))) => {
                            self.update_hybrid(|hybrid| hybrid.mark_downloaded(&name))
                        }
                        Some(Ok((name, Err(error)))) => {
                            warn!("Failed to download {name}: {error}");
                            self.update_hybrid(|hybrid| hybrid.mark_failed(&name))
                        }
                        Some(Err(error)) => {
                            error!("Bundle download task failed: {error}");
                            continue;
                        }
                    };

                    match saved {
                        Ok(BatchStatus::InFlight) => {}
                        Ok(status) => {
                            debug!("Download batch resolved as {status:?}");
                            return Some(status);
                        }
                        Err(error) => {
                            error!("Failed to save hybrid state during download: {error}");
                            tasks.abort_all();
                            return Some(BatchStatus::Failed);
                        }
                    }
                }
            }
        }
    }

    /// Extract every staged archive of a downloaded file into the live bundle
    /// directory. An archive that fails to extract counts as a failed download.
    fn extract_staged(&self) -> BatchOutcome {
        let bundle_dir = self.paths.bundle_dir();
        let staging_dir = self.paths.staging_dir();
        if let Err(error) = std::fs::create_dir_all(&bundle_dir) {
            error!("Failed to create {}: {error}", bundle_dir.display());
            return BatchOutcome::Failed;
        }

        let names: Vec<String> = {
            let hybrid = lock(&self.hybrid);
            hybrid
                .active_file_names()
                .into_iter()
                .filter(|name| hybrid.file(name).is_some_and(BundleFileState::is_downloaded))
                .collect()
        };
        let mut failed = Vec::new();
        for name in names {
            let Ok(staged) = staging_path(&staging_dir, &name) else {
                continue;
            };
            if !staged.is_file() {
                continue;
            }

            if archive::extract(&ArchiveSource::File(staged.clone()), &bundle_dir) {
                debug!("Extracted {name}");
                if let Err(error) = std::fs::remove_file(&staged) {
                    warn!("Failed to remove staged {}: {error}", staged.display());
                }
            } else {
                failed.push(name);
            }
        }

        if failed.is_empty() {
            return BatchOutcome::Succeeded;
        }

        let saved = self.update_hybrid(|hybrid| {
            for name in &failed {
                hybrid.mark_failed(name);
            }
        });
        if let Err(error) = saved {
            error!("Failed to save hybrid state after extraction: {error}");
        }
        BatchOutcome::Failed
    }

    /// Extract archives a previous run staged but never extracted, so a
    /// later reconcile only adopts a version whose files are in place.
    pub(crate) fn recover_staged(&self) {
        let staging_dir = self.paths.staging_dir();
        let staged = {
            let hybrid = lock(&self.hybrid);
            hybrid
                .active_file_names()
                .into_iter()
                .filter(|name| {
                    hybrid.file(name).is_some_and(BundleFileState::is_downloaded)
                        && staging_path(&staging_dir, name).is_ok_and(|path| path.is_file())
                })
                .count()
        };
        if staged == 0 {
            return;
        }

        info!("Extracting {staged} bundle file(s) staged by the previous run");
        if self.extract_staged() == BatchOutcome::Failed {
            warn!("Some staged bundle files could not be extracted and will be downloaded again");
        }
    }

    fn batch_status(&self) -> BatchStatus {
        lock(&self.hybrid).batch_status()
    }

    fn finish_batch(&self, outcome: BatchOutcome) {
        let saved = self.update_hybrid(|hybrid| hybrid.complete_batch(outcome, Utc::now()));
        if let Err(error) = saved {
            error!("Failed to save hybrid state after download: {error}");
        }
        self.handle_after_sync_event();
    }
}
