//! Connect/reconnect state machine.
//!
//! Every external signal arrives as a `Message` and goes through
//! `Orchestrator::handle`, which updates state synchronously and returns the
//! side effects (RPCs, prompts, notifications) for the runtime to perform.
//! Results of those effects come back as further messages.

use super::state::{ConnectRequest, ConnectionFault, ConnectionState, Notification, SessionView};
use super::{SessionEvent, SessionId, SessionSecret};
use crate::config::OrchestratorSettings;
use crate::connections::{ConnectionProfile, ConnectionRegistry};
use crate::logging::{self, LogLevel, LogSubsystem};
use crate::secrets::SecretCache;
use crate::terminal::{TerminalOutput, TerminalSink};
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Events held back while a create call is in flight
const EARLY_EVENT_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// False when no backend can be reached; connects then only show
    /// `settings.fallback_lines`
    pub backend_available: bool,
    pub settings: OrchestratorSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_available: true,
            settings: OrchestratorSettings::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    /// Explicit user connect for a profile
    Connect { connection_id: String },
    /// Explicit user connect for whatever the registry considers active
    ConnectSelected,
    ActiveConnectionChanged { connection_id: Option<String> },
    /// The prompt path has already written the secret cache
    SecretSubmitted { connection_id: String },
    SecretCancelled { connection_id: String },
    /// The secret cache changed outside the prompt path
    SecretsUpdated,
    SessionCreated { request: ConnectRequest, session_id: SessionId },
    SessionCreateFailed { request: ConnectRequest, error: String },
    Backend(SessionEvent),
    TerminalReady(bool),
    Input(String),
    InputFailed { error: String },
    Teardown,
}

#[derive(Debug, Clone)]
pub enum Effect {
    PromptSecret(ConnectionProfile),
    /// Close `previous` (errors ignored), then create a session for `request`
    CreateSession {
        request: ConnectRequest,
        previous: Option<SessionId>,
        secret: Option<SessionSecret>,
    },
    CloseSession(SessionId),
    SendInput { session_id: SessionId, data: String },
    MarkConnected(String),
    Notify(Notification),
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ConnectionRegistry>,
    secrets: Arc<SecretCache>,
    output: TerminalOutput,
    state: ConnectionState,
    connecting: bool,
    error: Option<String>,
    fault: Option<ConnectionFault>,
    current_session: Option<SessionId>,
    request: Option<ConnectRequest>,
    latest_nonce: u64,
    /// Connections with a prompt currently open
    pending_secrets: HashSet<String>,
    blocked_secret: Option<String>,
    /// Output that raced ahead of `SessionCreated`
    early_events: VecDeque<SessionEvent>,
    connect_started: Option<DateTime<Utc>>,
    latency_ms: Option<u64>,
    updated_at: Option<DateTime<Utc>>,
    torn_down: bool,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<ConnectionRegistry>,
        secrets: Arc<SecretCache>,
        sink: Box<dyn TerminalSink>,
    ) -> Self {
        Self {
            config,
            registry,
            secrets,
            output: TerminalOutput::new(sink),
            state: ConnectionState::Idle,
            connecting: false,
            error: None,
            fault: None,
            current_session: None,
            request: None,
            latest_nonce: 0,
            pending_secrets: HashSet::new(),
            blocked_secret: None,
            early_events: VecDeque::new(),
            connect_started: None,
            latency_ms: None,
            updated_at: None,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_session(&self) -> Option<&str> {
        self.current_session.as_deref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            state: self.state,
            connecting: self.connecting,
            error: self.error.clone(),
            fault: self.fault.clone(),
            session_id: self.current_session.clone(),
            connection_id: self.request.as_ref().map(|r| r.connection_id.clone()),
            blocked_connection_id: self.blocked_secret.clone(),
            latency_ms: self.latency_ms,
            updated_at: self.updated_at,
        }
    }

    fn transition(&mut self, state: ConnectionState) {
        self.state = state;
        self.updated_at = Some(Utc::now());
    }

    pub fn handle(&mut self, message: Message) -> Vec<Effect> {
        if self.torn_down {
            tracing::trace!("Ignoring {:?} after teardown", message);
            return vec![];
        }

        match message {
            Message::Connect { connection_id } => self.connect(connection_id),
            Message::ConnectSelected => match self.registry.active() {
                Some(connection) => self.connect(connection.id),
                None => vec![Effect::Notify(Notification::warning("无可用连接", "请先创建连接"))],
            },
            Message::ActiveConnectionChanged { connection_id } => {
                tracing::debug!("Active connection changed to {:?}", connection_id);
                self.blocked_secret = None;
                vec![]
            }
            Message::SecretSubmitted { connection_id } => self.secret_submitted(connection_id),
            Message::SecretCancelled { connection_id } => self.secret_cancelled(connection_id),
            Message::SecretsUpdated => self.secrets_updated(),
            Message::SessionCreated { request, session_id } => {
                self.session_created(request, session_id)
            }
            Message::SessionCreateFailed { request, error } => {
                self.session_create_failed(request, error)
            }
            Message::Backend(event) => {
                self.backend_event(event);
                vec![]
            }
            Message::TerminalReady(ready) => {
                self.output.set_ready(ready);
                vec![]
            }
            Message::Input(data) => match &self.current_session {
                Some(session_id) => vec![Effect::SendInput {
                    session_id: session_id.clone(),
                    data,
                }],
                None => vec![],
            },
            Message::InputFailed { error } => {
                let fault = ConnectionFault::InputDeliveryFailed(error.clone());
                tracing::warn!("{}", logging::sanitize(&fault.to_string()));
                let line = format!("{}: {}", self.config.settings.input_failed_prefix, error);
                self.output.write_line(&line);
                vec![]
            }
            Message::Teardown => self.teardown(),
        }
    }

    fn connect(&mut self, connection_id: String) -> Vec<Effect> {
        self.latest_nonce += 1;
        let request = ConnectRequest {
            connection_id,
            nonce: self.latest_nonce,
        };
        tracing::info!(
            "Connect request #{} for {}",
            request.nonce,
            request.connection_id
        );

        // Only an explicit request lifts a cancellation block
        if self.blocked_secret.as_deref() == Some(request.connection_id.as_str()) {
            self.blocked_secret = None;
        }

        self.evaluate(request)
    }

    fn evaluate(&mut self, request: ConnectRequest) -> Vec<Effect> {
        if !self.config.backend_available {
            let transcript = self.config.settings.fallback_lines.join("\n");
            self.current_session = None;
            self.output.reset(Some(&transcript));
            self.connecting = false;
            self.request = None;
            self.early_events.clear();
            self.transition(ConnectionState::Idle);
            return vec![];
        }

        let Some(connection) = self.registry.get(&request.connection_id) else {
            tracing::warn!("Connect request for unknown connection {}", request.connection_id);
            self.abandon_request();
            return vec![];
        };

        if self.requires_secret(&connection) && !self.secrets.has_secret(&connection.id) {
            return self.gate_on_secret(request, connection);
        }

        self.start_connecting(request, &connection)
    }

    fn requires_secret(&self, connection: &ConnectionProfile) -> bool {
        self.config
            .settings
            .secret_required_protocols
            .iter()
            .any(|p| p.eq_ignore_ascii_case(connection.protocol.as_str()))
    }

    fn gate_on_secret(&mut self, request: ConnectRequest, connection: ConnectionProfile) -> Vec<Effect> {
        let id = connection.id.as_str();

        if self.blocked_secret.as_deref() == Some(id) {
            tracing::debug!("Secret prompt for {} is blocked until an explicit retry", id);
            self.connecting = false;
            return vec![];
        }

        self.request = Some(request);
        self.transition(ConnectionState::AwaitingSecret);
        self.connecting = false;

        if self.pending_secrets.contains(id) {
            tracing::debug!("Secret prompt for {} already open", id);
            return vec![];
        }

        tracing::info!("{} for {}", ConnectionFault::SecretRequired, id);
        self.pending_secrets.insert(connection.id.clone());
        vec![Effect::PromptSecret(connection)]
    }

    fn start_connecting(&mut self, request: ConnectRequest, connection: &ConnectionProfile) -> Vec<Effect> {
        let previous = self.current_session.take();
        if let Some(previous) = &previous {
            tracing::info!("Releasing session {} before reconnecting", previous);
        }

        self.output.reset(None);
        self.error = None;
        self.fault = None;
        self.connecting = true;
        self.early_events.clear();
        self.latency_ms = None;
        self.connect_started = Some(Utc::now());
        self.transition(ConnectionState::Connecting);
        self.request = Some(request.clone());

        let secret = self
            .secrets
            .get_secret(&connection.id)
            .map(|password| SessionSecret { password });

        logging::log(
            LogLevel::Info,
            LogSubsystem::Session,
            format!(
                "Connecting #{} to {}@{}:{} ({})",
                request.nonce, connection.username, connection.host, connection.port, connection.protocol
            ),
        );

        vec![Effect::CreateSession {
            request,
            previous,
            secret,
        }]
    }

    fn abandon_request(&mut self) {
        self.request = None;
        self.connecting = false;
        self.early_events.clear();
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::AwaitingSecret
        ) {
            self.transition(self.resting_state());
        }
    }

    /// Where a dropped attempt falls back to: a session that is still live
    /// keeps the view `Active`
    fn resting_state(&self) -> ConnectionState {
        if self.current_session.is_some() {
            ConnectionState::Active
        } else {
            ConnectionState::Idle
        }
    }

    fn awaiting_secret_for(&self, connection_id: &str) -> Option<ConnectRequest> {
        match &self.request {
            Some(request)
                if self.state == ConnectionState::AwaitingSecret
                    && request.connection_id == connection_id =>
            {
                Some(request.clone())
            }
            _ => None,
        }
    }

    fn secret_submitted(&mut self, connection_id: String) -> Vec<Effect> {
        self.pending_secrets.remove(&connection_id);

        match self.awaiting_secret_for(&connection_id) {
            Some(request) => self.evaluate(request),
            None => {
                tracing::debug!("Secret for {} cached; no attempt is waiting on it", connection_id);
                vec![]
            }
        }
    }

    fn secret_cancelled(&mut self, connection_id: String) -> Vec<Effect> {
        self.pending_secrets.remove(&connection_id);
        self.blocked_secret = Some(connection_id.clone());
        tracing::info!("{} for {}", ConnectionFault::SecretCancelled, connection_id);

        if self.awaiting_secret_for(&connection_id).is_some() {
            let message = self.config.settings.cancelled_message.clone();
            self.output.reset(Some(&message));
            self.connecting = false;
            self.request = None;
            self.fault = Some(ConnectionFault::SecretCancelled);
            self.transition(self.resting_state());
        }
        vec![]
    }

    fn secrets_updated(&mut self) -> Vec<Effect> {
        let Some(request) = self.request.clone() else {
            return vec![];
        };
        if self.state != ConnectionState::AwaitingSecret
            || !self.secrets.has_secret(&request.connection_id)
        {
            return vec![];
        }
        self.evaluate(request)
    }

    fn is_live(&self, request: &ConnectRequest) -> bool {
        request.nonce == self.latest_nonce
            && self.state == ConnectionState::Connecting
            && self.request.as_ref() == Some(request)
    }

    fn session_created(&mut self, request: ConnectRequest, session_id: SessionId) -> Vec<Effect> {
        if !self.is_live(&request) {
            tracing::info!(
                "Attempt #{} superseded (latest #{}); closing session {}",
                request.nonce,
                self.latest_nonce,
                session_id
            );
            return vec![Effect::CloseSession(session_id)];
        }

        tracing::info!("Session {} active for {}", session_id, request.connection_id);
        logging::log_session(
            LogLevel::Info,
            LogSubsystem::Session,
            session_id.clone(),
            format!("Session active for {}", request.connection_id),
        );

        self.latency_ms = self
            .connect_started
            .take()
            .map(|started| (Utc::now() - started).num_milliseconds().max(0) as u64);
        self.current_session = Some(session_id.clone());
        self.transition(ConnectionState::Active);
        self.connecting = false;

        let early: Vec<SessionEvent> = self.early_events.drain(..).collect();
        for event in early {
            if event.session_id() == session_id {
                self.backend_event(event);
            }
        }
        vec![Effect::MarkConnected(request.connection_id)]
    }

    fn session_create_failed(&mut self, request: ConnectRequest, error: String) -> Vec<Effect> {
        if !self.is_live(&request) {
            tracing::debug!("Ignoring failure of superseded attempt #{}", request.nonce);
            return vec![];
        }

        let fault = ConnectionFault::SessionCreateFailed(error.clone());
        tracing::warn!("{}", logging::sanitize(&fault.to_string()));
        logging::log_details(
            LogLevel::Error,
            LogSubsystem::Session,
            "Session create failed",
            serde_json::json!({
                "connectionId": request.connection_id,
                "attempt": request.nonce,
                "error": error,
            }),
        );

        self.transition(ConnectionState::Failed);
        self.connecting = false;
        self.early_events.clear();
        self.connect_started = None;
        self.error = Some(error.clone());
        self.fault = Some(fault);
        self.request = None;
        vec![Effect::Notify(Notification::error("会话启动失败", error))]
    }

    fn backend_event(&mut self, event: SessionEvent) {
        if self.current_session.as_deref() != Some(event.session_id()) {
            if self.state == ConnectionState::Connecting && self.early_events.len() < EARLY_EVENT_LIMIT {
                self.early_events.push_back(event);
            } else {
                tracing::trace!("Dropping event for non-current session {}", event.session_id());
            }
            return;
        }

        match event {
            SessionEvent::Data(payload) => {
                self.output.write_raw(&payload.data);
                if payload.stream == super::OutputStream::Stderr
                    && payload.data.starts_with(&self.config.settings.fatal_error_prefix)
                {
                    tracing::warn!("Remote fault on {}", payload.session_id);
                    self.fault = Some(ConnectionFault::RemoteFault(payload.data.clone()));
                    self.error = Some(payload.data);
                    self.connecting = false;
                }
            }
            SessionEvent::Closed(payload) => {
                let ended = self.config.settings.session_ended_message.clone();
                tracing::info!("Session {} ended", payload.session_id);
                logging::log_session(
                    LogLevel::Info,
                    LogSubsystem::Session,
                    payload.session_id,
                    ConnectionFault::SessionEnded.to_string(),
                );

                self.output.write_line(&ended);
                self.current_session = None;
                self.error = Some(ended);
                self.fault = Some(ConnectionFault::SessionEnded);
                self.connecting = false;
                if self.state == ConnectionState::Active {
                    self.transition(ConnectionState::Closed);
                }
            }
        }
    }

    fn teardown(&mut self) -> Vec<Effect> {
        self.torn_down = true;
        self.connecting = false;
        self.request = None;
        self.pending_secrets.clear();
        self.early_events.clear();
        match self.current_session.take() {
            Some(session_id) => {
                tracing::info!("Teardown: closing session {}", session_id);
                vec![Effect::CloseSession(session_id)]
            }
            None => vec![],
        }
    }
}
