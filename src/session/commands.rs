//! Tauri surface of the session orchestrator and the webview-backed
//! collaborators it drives.

use super::runtime::{Notifier, OrchestratorHandle, PromptOutcome, PromptResponders, SecretPrompt};
use super::state::{Notification, SessionView};
use super::summary::{summarize, SessionSummary};
use super::{SessionEventBus, Subscription};
use crate::connections::ConnectionProfile;
use crate::error::AppResult;
use crate::secrets::Secret;
use crate::state::AppState;
use crate::terminal::TerminalSink;
use async_trait::async_trait;
use std::sync::Arc;
use tauri::{AppHandle, Emitter, State};

pub const TERMINAL_OUTPUT_EVENT: &str = "terminal-output";
pub const TERMINAL_RESET_EVENT: &str = "terminal-reset";
pub const SESSION_VIEW_EVENT: &str = "session-view";
pub const SECRET_PROMPT_EVENT: &str = "secret-prompt";
pub const NOTIFICATION_EVENT: &str = "notification";

/// Terminal widget in the webview
pub struct TauriTerminalSink {
    app: AppHandle,
}

impl TauriTerminalSink {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl TerminalSink for TauriTerminalSink {
    fn write(&mut self, chunk: &str) {
        if let Err(e) = self.app.emit(TERMINAL_OUTPUT_EVENT, chunk) {
            tracing::warn!("Failed to emit terminal output: {}", e);
        }
    }

    fn clear(&mut self) {
        if let Err(e) = self.app.emit(TERMINAL_RESET_EVENT, ()) {
            tracing::warn!("Failed to emit terminal reset: {}", e);
        }
    }
}

/// Password modal. Waiters are answered by `submit_secret`/`cancel_secret`.
pub struct TauriSecretPrompt {
    app: AppHandle,
    responders: PromptResponders,
}

impl TauriSecretPrompt {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            responders: PromptResponders::new(),
        }
    }

    /// Returns false when no prompt is open for the connection
    pub fn resolve(&self, connection_id: &str, outcome: PromptOutcome) -> bool {
        self.responders.resolve(connection_id, outcome)
    }
}

#[async_trait]
impl SecretPrompt for TauriSecretPrompt {
    async fn prompt_for_secret(&self, connection: &ConnectionProfile) -> PromptOutcome {
        let (rx, first) = self.responders.register(&connection.id);

        if first {
            if let Err(e) = self.app.emit(SECRET_PROMPT_EVENT, connection) {
                tracing::warn!("Failed to open secret prompt: {}", e);
                self.responders.resolve(&connection.id, PromptOutcome::Cancelled);
            }
        }

        rx.await.unwrap_or(PromptOutcome::Cancelled)
    }
}

pub struct TauriNotifier {
    app: AppHandle,
}

impl TauriNotifier {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl Notifier for TauriNotifier {
    fn notify(&self, notification: &Notification) {
        if let Err(e) = self.app.emit(NOTIFICATION_EVENT, notification) {
            tracing::warn!("Failed to emit notification: {}", e);
        }
    }
}

/// Keeps backend events flowing to the webview for the app's lifetime
pub struct EventForwarder {
    _subscription: Subscription,
}

impl EventForwarder {
    pub fn new(app: AppHandle, bus: &Arc<SessionEventBus>) -> Self {
        let subscription = bus.subscribe(move |event| {
            if let Err(e) = app.emit(event.name(), event.payload()) {
                tracing::debug!("Failed to forward {}: {}", event.name(), e);
            }
        });
        Self {
            _subscription: subscription,
        }
    }
}

/// Re-emit every view change as `session-view`
pub fn forward_view(app: AppHandle, handle: &OrchestratorHandle) {
    let mut views = handle.watch_view();
    tauri::async_runtime::spawn(async move {
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            if let Err(e) = app.emit(SESSION_VIEW_EVENT, view) {
                tracing::debug!("Failed to emit session view: {}", e);
            }
        }
    });
}

#[tauri::command]
pub async fn connect_session(state: State<'_, Arc<AppState>>, connection_id: String) -> AppResult<()> {
    tracing::info!("Connect requested for {}", connection_id);
    state.orchestrator.connect(connection_id)
}

#[tauri::command]
pub async fn connect_selected(state: State<'_, Arc<AppState>>) -> AppResult<()> {
    state.orchestrator.connect_selected()
}

/// Answer the open prompt for a connection, or just cache the secret when
/// none is open
#[tauri::command]
pub async fn submit_secret(
    state: State<'_, Arc<AppState>>,
    prompts: State<'_, Arc<TauriSecretPrompt>>,
    connection_id: String,
    password: String,
) -> AppResult<()> {
    let secret = Secret::new(password)?;
    if prompts.resolve(&connection_id, PromptOutcome::Submitted(secret.clone())) {
        return Ok(());
    }

    state.secrets.store_secret(&connection_id, secret);
    state.orchestrator.secrets_updated()
}

#[tauri::command]
pub async fn cancel_secret(
    prompts: State<'_, Arc<TauriSecretPrompt>>,
    connection_id: String,
) -> AppResult<()> {
    if !prompts.resolve(&connection_id, PromptOutcome::Cancelled) {
        tracing::debug!("No open secret prompt for {}", connection_id);
    }
    Ok(())
}

#[tauri::command]
pub async fn send_session_input(state: State<'_, Arc<AppState>>, data: String) -> AppResult<()> {
    state.orchestrator.send_input(data)
}

/// Mount/unmount of the terminal widget
#[tauri::command]
pub async fn terminal_ready(state: State<'_, Arc<AppState>>, ready: bool) -> AppResult<()> {
    state.orchestrator.terminal_ready(ready)
}

#[tauri::command]
pub async fn get_session_view(state: State<'_, Arc<AppState>>) -> AppResult<SessionView> {
    Ok(state.orchestrator.view())
}

#[tauri::command]
pub async fn list_session_summaries(state: State<'_, Arc<AppState>>) -> AppResult<Vec<SessionSummary>> {
    let view = state.orchestrator.view();
    Ok(summarize(&view, &state.registry.list()))
}
