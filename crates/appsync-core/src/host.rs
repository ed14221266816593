//! Collaborators supplied by the host application.

use async_trait::async_trait;

use crate::records::UpgradeKind;

/// Best-effort device identifier; `None` when it cannot be obtained.
#[async_trait]
pub trait DeviceIdentity: Send + Sync {
    async fn device_identifier(&self) -> Option<String>;
}

/// Best-effort push-notification token; `None` when it cannot be obtained.
#[async_trait]
pub trait PushTokenSource: Send + Sync {
    async fn notification_token(&self) -> Option<String>;
}

/// How the platform install flow for a native update ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFlowOutcome {
    /// The platform has no update to offer right now.
    Unavailable,
    /// An update is already being installed.
    Installing,
    /// The user was asked and answered.
    Prompted { accepted: bool },
    /// A flexible update finished downloading and is ready to restart.
    Downloaded,
    /// A blocking update took over; the host is about to restart.
    ImmediateUpdateStarted,
}

/// The platform's native install flow.
#[async_trait]
pub trait NativeUpdateFlow: Send + Sync {
    async fn start_update_flow(&self, kind: UpgradeKind) -> NativeFlowOutcome;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoDeviceIdentity;

#[async_trait]
impl DeviceIdentity for NoDeviceIdentity {
    async fn device_identifier(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPushToken;

#[async_trait]
impl PushTokenSource for NoPushToken {
    async fn notification_token(&self) -> Option<String> {
        None
    }
}

/// For hosts without an in-app update mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNativeUpdateFlow;

#[async_trait]
impl NativeUpdateFlow for NoNativeUpdateFlow {
    async fn start_update_flow(&self, _kind: UpgradeKind) -> NativeFlowOutcome {
        NativeFlowOutcome::Unavailable
    }
}
