use super::SessionId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Lifecycle of the current connect attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    #[default]
    Idle,
    AwaitingSecret,
    Connecting,
    Active,
    Failed,
    Closed,
}

/// One user-triggered (re)connect attempt. Nonces only grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub connection_id: String,
    pub nonce: u64,
}

/// Everything that can go wrong (or need the user) while connecting
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum ConnectionFault {
    #[error("secret required")]
    SecretRequired,
    #[error("secret prompt cancelled")]
    SecretCancelled,
    #[error("session create failed: {0}")]
    SessionCreateFailed(String),
    #[error("remote fault: {0}")]
    RemoteFault(String),
    #[error("session ended")]
    SessionEnded,
    #[error("input delivery failed: {0}")]
    InputDeliveryFailed(String),
}

/// What the UI renders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub state: ConnectionState,
    pub connecting: bool,
    pub error: Option<String>,
    pub fault: Option<ConnectionFault>,
    pub session_id: Option<SessionId>,
    pub connection_id: Option<String>,
    pub blocked_connection_id: Option<String>,
    /// Round trip of the create call behind the current session
    pub latency_ms: Option<u64>,
    /// Last state transition
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Toast shown by the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            title: title.into(),
            message: message.into(),
        }
    }
}
