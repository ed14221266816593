use chrono::{DateTime, Duration, Utc};
use log::{debug, info};

use crate::protocol::TrackNode;
use crate::records::{NativeUpdateState, UpgradeKind, reprompt_due};

/// Reconciles the native-application part of a sync response.
///
/// The install flow itself belongs to the host; this track only decides
/// whether it should run and remembers what the user answered.
#[derive(Debug, Clone)]
pub struct NativeTrack {
    state: Option<NativeUpdateState>,
    reprompt_interval: Duration,
}

impl NativeTrack {
    #[must_use]
    pub fn new(state: Option<NativeUpdateState>, reprompt_interval: Duration) -> Self {
        Self {
            state,
            reprompt_interval,
        }
    }

    #[must_use]
    pub fn state(&self) -> Option<&NativeUpdateState> {
        self.state.as_ref()
    }

    /// Apply the server's native node. The caller persists the state
    /// afterwards whatever the result, so the prompt cadence survives restarts.
    pub fn reconcile(&mut self, node: &TrackNode, now: DateTime<Utc>) -> bool {
        if let Some(release) = &node.release {
            let kind = UpgradeKind::from_unsupported_flag(node.unsupported_version);
            let unchanged = self.state.as_ref().is_some_and(|state| {
                state.upgrade_kind == kind && state.target_version == release.version
            });
            if !unchanged {
                info!(
                    "Native release {} declared ({kind:?})",
                    release.version
                );
                self.state = Some(NativeUpdateState::new(kind, release.version.clone()));
            }
        }

        if let Some(state) = self.state.as_mut()
            && state.user_acceptance.is_some()
            && state.upgrade_kind == UpgradeKind::Optional
            && reprompt_due(state.last_prompt_at, now, self.reprompt_interval)
        {
            debug!("Re-prompt interval elapsed for native {}", state.target_version);
            state.user_acceptance = None;
        }

        self.needs_action()
    }

    #[must_use]
    pub fn needs_action(&self) -> bool {
        self.state.as_ref().is_some_and(|state| match state.upgrade_kind {
            UpgradeKind::Mandatory => true,
            UpgradeKind::Optional => state.user_acceptance != Some(false),
        })
    }

    #[must_use]
    pub fn upgrade_kind(&self) -> Option<UpgradeKind> {
        self.state.as_ref().map(|state| state.upgrade_kind)
    }

    /// Record the user's answer to the native update dialog.
    pub fn record_dialog_response(&mut self, accepted: bool, now: DateTime<Utc>) {
        if let Some(state) = self.state.as_mut() {
            state.user_acceptance = Some(accepted);
            state.last_prompt_at = Some(now);
        }
    }
}
