//! Backend contract: the three session RPCs plus the shared event stream
//! that carries output and close notifications keyed by session id.

use crate::error::AppResult;
use crate::secrets::Secret;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Opaque handle returned by the backend
pub type SessionId = String;

pub const SESSION_DATA_EVENT: &str = "session-data";
pub const SESSION_CLOSED_EVENT: &str = "session-closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDataPayload {
    pub session_id: SessionId,
    pub stream: OutputStream,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosedPayload {
    pub session_id: SessionId,
}

/// One message on the backend event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Data(SessionDataPayload),
    Closed(SessionClosedPayload),
}

impl SessionEvent {
    pub fn data(session_id: impl Into<String>, stream: OutputStream, data: impl Into<String>) -> Self {
        SessionEvent::Data(SessionDataPayload {
            session_id: session_id.into(),
            stream,
            data: data.into(),
        })
    }

    pub fn closed(session_id: impl Into<String>) -> Self {
        SessionEvent::Closed(SessionClosedPayload {
            session_id: session_id.into(),
        })
    }

    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Data(payload) => &payload.session_id,
            SessionEvent::Closed(payload) => &payload.session_id,
        }
    }

    /// Event name on the wire
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Data(_) => SESSION_DATA_EVENT,
            SessionEvent::Closed(_) => SESSION_CLOSED_EVENT,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        let value = match self {
            SessionEvent::Data(payload) => serde_json::to_value(payload),
            SessionEvent::Closed(payload) => serde_json::to_value(payload),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// Credentials handed to `create_shell_session`
#[derive(Debug, Clone)]
pub struct SessionSecret {
    pub password: Secret,
}

/// RPC surface of the host backend
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Fails when the host is unreachable or credentials are rejected
    async fn create_shell_session(
        &self,
        connection_id: &str,
        secret: Option<SessionSecret>,
    ) -> AppResult<SessionId>;

    async fn send_session_input(&self, session_id: &str, data: &str) -> AppResult<()>;

    /// Idempotent; closing an unknown session is not an error
    async fn close_shell_session(&self, session_id: &str) -> AppResult<()>;
}

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Fan-out of backend events to any number of subscribers
#[derive(Default)]
pub struct SessionEventBus {
    next_id: AtomicU64,
    handlers: DashMap<u64, Handler>,
}

impl SessionEventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler. It stays registered until the returned
    /// `Subscription` is dropped.
    pub fn subscribe<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.insert(id, Arc::new(handler));
        tracing::debug!("Session event subscriber {} registered", id);
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn publish(&self, event: SessionEvent) {
        // Snapshot first so a handler may (un)subscribe without deadlocking
        let handlers: Vec<Handler> = self
            .handlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }

    fn unsubscribe(&self, id: u64) {
        if self.handlers.remove(&id).is_some() {
            tracing::debug!("Session event subscriber {} removed", id);
        }
    }
}

/// Registration guard returned by `SessionEventBus::subscribe`
pub struct Subscription {
    bus: Weak<SessionEventBus>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
