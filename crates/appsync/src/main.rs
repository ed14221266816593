mod error;
mod host;
mod logging;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use appsync_core::archive::ArchiveSource;
use appsync_core::host::NoPushToken;
use appsync_core::{AppSync, SyncOutcome};
use appsync_platform::{PlatformInfo, SyncPaths};
use log::{error, info};
use tokio::sync::mpsc;

use crate::error::HostError;
use crate::host::{ConsoleObserver, MachineIdentity, TerminalNativeFlow};
use crate::settings::HostSettings;

const OBSERVER_CONTEXT: &str = "console";
const IDLE_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error}");
            eprintln!("appsync: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool, HostError> {
    let paths = SyncPaths::new()?;
    let settings_path = paths.settings_file();
    let settings = HostSettings::load(&settings_path)?;
    logging::init_logging(&paths, settings.debug_logging, settings.max_log_size_bytes);

    if !settings_path.exists() {
        settings
            .save(&settings_path)
            .map_err(|source| HostError::WriteSettings {
                path: settings_path.display().to_string(),
                source,
            })?;
        info!("Wrote default settings to {}", settings_path.display());
    }
    settings.sync.validate()?;

    let mut builder = AppSync::builder(settings.sync.clone(), paths)
        .native_version(env!("CARGO_PKG_VERSION"))
        .platform(PlatformInfo::detect())
        .device_identity(Arc::new(MachineIdentity::default()))
        .push_tokens(Arc::new(NoPushToken))
        .native_update_flow(Arc::new(TerminalNativeFlow));
    if let Some(baseline) = &settings.baseline_archive {
        builder = builder.baseline_archive(ArchiveSource::File(baseline.clone()));
    }
    let app = builder.build()?;

    let (finished_tx, mut finished) = mpsc::unbounded_channel();
    app.register_observer(
        OBSERVER_CONTEXT,
        Arc::new(ConsoleObserver::new(settings.auto_accept_optional, finished_tx)),
    );

    let outcome = app.sync().await?;
    report_outcome(&outcome);
    if !settings.sync.auto_hybrid_update && outcome.hybrid.is_some() {
        app.apply_pending_hybrid_update()?;
    }

    let wait = Duration::from_secs(settings.wait_timeout_secs);
    let Ok(success) = tokio::time::timeout(wait, wait_for_completion(&app, &mut finished)).await
    else {
        if app.stop_download() {
            let _ = tokio::time::timeout(Duration::from_secs(5), finished.recv()).await;
        }
        return Err(HostError::Timeout(settings.wait_timeout_secs));
    };

    app.unregister_context(OBSERVER_CONTEXT);
    Ok(success)
}

fn report_outcome(outcome: &SyncOutcome) {
    if let Some(native) = &outcome.native {
        println!(
            "Application release {} is available ({:?})",
            native.target_version, native.upgrade_kind
        );
    }
    if let Some(hybrid) = &outcome.hybrid {
        println!(
            "Content release {} is available ({:?})",
            hybrid.target_version, hybrid.upgrade_kind
        );
    }
}

/// Wait for the attempt to resolve. Flows that end without an `after_sync`
/// notification, such as a native install taking over, count as success once
/// the guard is released.
async fn wait_for_completion(app: &AppSync, finished: &mut mpsc::UnboundedReceiver<bool>) -> bool {
    loop {
        tokio::select! {
            Some(success) = finished.recv() => return success,
            () = tokio::time::sleep(IDLE_POLL) => {
                if !app.is_sync_in_progress() {
                    return finished.try_recv().unwrap_or(true);
                }
            }
        }
    }
}
