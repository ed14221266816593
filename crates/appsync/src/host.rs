//! Console implementations of the engine's host collaborators.

use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;

use appsync_core::host::{DeviceIdentity, NativeFlowOutcome, NativeUpdateFlow};
use appsync_core::records::{HybridUpdateState, UpgradeKind};
use appsync_core::{ConsentRequest, SyncObserver};
use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc;

/// Device identifier taken from the system machine id, when readable.
pub struct MachineIdentity {
    path: PathBuf,
}

impl Default for MachineIdentity {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/machine-id"),
        }
    }
}

#[async_trait]
impl DeviceIdentity for MachineIdentity {
    async fn device_identifier(&self) -> Option<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Some(content.trim().to_string()).filter(|id| !id.is_empty()),
            Err(error) => {
                debug!("No machine id at {}: {error}", self.path.display());
                None
            }
        }
    }
}

fn ask(question: &str) -> bool {
    let mut stdout = std::io::stdout();
    let _ = write!(stdout, "{question} [y/N] ");
    let _ = stdout.flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Asks on the terminal whether to install a native update.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalNativeFlow;

#[async_trait]
impl NativeUpdateFlow for TerminalNativeFlow {
    async fn start_update_flow(&self, kind: UpgradeKind) -> NativeFlowOutcome {
        if !std::io::stdin().is_terminal() {
            debug!("No terminal to ask about the {kind:?} native update");
            return NativeFlowOutcome::Unavailable;
        }

        let question = match kind {
            UpgradeKind::Mandatory => "A required application update is available. Install it now?",
            UpgradeKind::Optional => "An application update is available. Install it now?",
        };
        match tokio::task::spawn_blocking(move || ask(question)).await {
            Ok(accepted) => NativeFlowOutcome::Prompted { accepted },
            Err(error) => {
                warn!("Native update prompt failed: {error}");
                NativeFlowOutcome::Unavailable
            }
        }
    }
}

/// Prints sync outcomes and forwards the final result to `main`.
pub struct ConsoleObserver {
    auto_accept_optional: bool,
    finished: mpsc::UnboundedSender<bool>,
}

impl ConsoleObserver {
    pub fn new(auto_accept_optional: bool, finished: mpsc::UnboundedSender<bool>) -> Self {
        Self {
            auto_accept_optional,
            finished,
        }
    }
}

impl SyncObserver for ConsoleObserver {
    fn require_hybrid_consent(&self, consent: ConsentRequest) {
        if self.auto_accept_optional {
            consent.respond(true);
            return;
        }
        if !std::io::stdin().is_terminal() {
            debug!("No terminal to ask about bundle {}", consent.target_version());
            return;
        }

        std::thread::spawn(move || {
            let question = format!(
                "Content update {} is available. Download it now?",
                consent.target_version()
            );
            consent.respond(ask(&question));
        });
    }

    fn after_sync(&self, success: bool, update: Option<&HybridUpdateState>) {
        match update {
            Some(update) if success => println!(
                "Content updated to {} ({} file(s) in {}s)",
                update.target_version,
                update.downloaded_names.len(),
                update.download_duration_secs
            ),
            Some(update) => println!(
                "Content update {} failed: {} file(s) downloaded, {} failed",
                update.target_version,
                update.downloaded_names.len(),
                update.failed_names.len()
            ),
            None if success => println!("Content is up to date"),
            None => println!("Content update failed"),
        }
        let _ = self.finished.send(success);
    }

    fn native_dialog_responded(&self, accepted: bool) {
        debug!("Native update dialog answered: {accepted}");
    }

    fn native_update_downloaded(&self) {
        println!("An application update was downloaded, restart to apply it");
    }
}

#[cfg(test)]
mod tests {
    use appsync_core::SyncObserver;
    use appsync_core::host::DeviceIdentity;
    use appsync_core::records::{HybridUpdateState, UpgradeKind};
    use tokio::sync::mpsc;

    use super::{ConsoleObserver, MachineIdentity};

    #[tokio::test]
    async fn machine_identity_trims_file_content() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let path = temp_dir.path().join("machine-id");
        std::fs::write(&path, "b1946ac92492d2347c6235b4d2611184\n").expect("machine id written");

        let identity = MachineIdentity { path };

        assert_eq!(
            identity.device_identifier().await.as_deref(),
            Some("b1946ac92492d2347c6235b4d2611184")
        );
    }

    #[tokio::test]
    async fn machine_identity_is_optional() {
        let temp_dir = tempfile::tempdir().expect("temporary directory should be created");
        let identity = MachineIdentity {
            path: temp_dir.path().join("absent"),
        };

        assert_eq!(identity.device_identifier().await, None);
    }

    #[test]
    fn console_observer_forwards_the_result() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let observer = ConsoleObserver::new(true, sender);
        let update = HybridUpdateState::new(UpgradeKind::Mandatory, "4".to_string());

        observer.after_sync(false, Some(&update));
        observer.after_sync(true, None);

        assert_eq!(receiver.try_recv().ok(), Some(false));
        assert_eq!(receiver.try_recv().ok(), Some(true));
    }
}
