//! Async driver for the orchestrator.
//!
//! One task owns the `Orchestrator` and processes messages strictly one at a
//! time. RPCs and prompts run in spawned tasks that report back through the
//! same channel, so a slow backend call only suspends its own attempt.
//! Spawned work holds a weak sender: dropping every `OrchestratorHandle`
//! ends the loop, which then tears the session down.

use super::orchestrator::{Effect, Message, Orchestrator, OrchestratorConfig};
use super::state::{ConnectRequest, Notification, NotificationLevel, SessionView};
use super::{SessionBackend, SessionEventBus, SessionId, SessionSecret, Subscription};
use crate::connections::{ConnectionProfile, ConnectionRegistry};
use crate::error::{AppError, AppResult, SerializableError};
use crate::logging;
use crate::secrets::{Secret, SecretCache};
use crate::terminal::TerminalSink;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Result of asking the operator for a secret
#[derive(Debug, Clone)]
pub enum PromptOutcome {
    Submitted(Secret),
    Cancelled,
}

/// Modal password prompt
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    async fn prompt_for_secret(&self, connection: &ConnectionProfile) -> PromptOutcome;
}

/// Waiters for open prompts, keyed by connection. Asking again for a
/// connection whose prompt is open joins that prompt instead of replacing it.
#[derive(Default)]
pub struct PromptResponders {
    pending: DashMap<String, Vec<oneshot::Sender<PromptOutcome>>>,
}

impl PromptResponders {
    pub fn new() -> Self {
        Self::default()
    }

    /// The flag is true for the first waiter, which is the one that should
    /// actually show the prompt
    pub fn register(&self, connection_id: &str) -> (oneshot::Receiver<PromptOutcome>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.pending.entry(connection_id.to_string()).or_default();
        let first = waiters.is_empty();
        waiters.push(tx);
        (rx, first)
    }

    pub fn is_open(&self, connection_id: &str) -> bool {
        self.pending.contains_key(connection_id)
    }

    /// Answer every waiter for the connection. Returns false when no prompt
    /// was open.
    pub fn resolve(&self, connection_id: &str, outcome: PromptOutcome) -> bool {
        let Some((_, waiters)) = self.pending.remove(connection_id) else {
            return false;
        };
        let mut delivered = false;
        for waiter in waiters {
            delivered |= waiter.send(outcome.clone()).is_ok();
        }
        delivered
    }
}

/// Toast sink
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Notifier for headless runs
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) {
        match notification.level {
            NotificationLevel::Error => {
                tracing::error!("{}: {}", notification.title, logging::sanitize(&notification.message))
            }
            NotificationLevel::Warning => {
                tracing::warn!("{}: {}", notification.title, logging::sanitize(&notification.message))
            }
            NotificationLevel::Info => {
                tracing::info!("{}: {}", notification.title, logging::sanitize(&notification.message))
            }
        }
    }
}

/// Collaborators the orchestrator talks to
pub struct OrchestratorDeps {
    pub config: OrchestratorConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub secrets: Arc<SecretCache>,
    pub backend: Arc<dyn SessionBackend>,
    pub bus: Arc<SessionEventBus>,
    pub prompt: Arc<dyn SecretPrompt>,
    pub notifier: Arc<dyn Notifier>,
}

/// Cloneable front door to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: UnboundedSender<Message>,
    view: watch::Receiver<SessionView>,
}

impl OrchestratorHandle {
    pub fn send(&self, message: Message) -> AppResult<()> {
        self.tx
            .send(message)
            .map_err(|_| AppError::Unknown("Session orchestrator has stopped".to_string()))
    }

    pub fn connect(&self, connection_id: impl Into<String>) -> AppResult<()> {
        self.send(Message::Connect {
            connection_id: connection_id.into(),
        })
    }

    pub fn connect_selected(&self) -> AppResult<()> {
        self.send(Message::ConnectSelected)
    }

    pub fn active_connection_changed(&self, connection_id: Option<String>) -> AppResult<()> {
        self.send(Message::ActiveConnectionChanged { connection_id })
    }

    pub fn secrets_updated(&self) -> AppResult<()> {
        self.send(Message::SecretsUpdated)
    }

    pub fn terminal_ready(&self, ready: bool) -> AppResult<()> {
        self.send(Message::TerminalReady(ready))
    }

    pub fn send_input(&self, data: impl Into<String>) -> AppResult<()> {
        self.send(Message::Input(data.into()))
    }

    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Close the current session and stop processing
    pub fn shutdown(&self) -> AppResult<()> {
        self.send(Message::Teardown)
    }
}

/// Start the driver task. The returned join handle completes after teardown.
pub fn spawn_orchestrator(
    deps: OrchestratorDeps,
    sink: Box<dyn TerminalSink>,
) -> (OrchestratorHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(SessionView::default());
    let weak = tx.downgrade();

    let subscription = {
        let weak = weak.clone();
        deps.bus.subscribe(move |event| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Message::Backend(event.clone()));
            }
        })
    };

    let orchestrator = Orchestrator::new(
        deps.config,
        Arc::clone(&deps.registry),
        Arc::clone(&deps.secrets),
        sink,
    );
    let input = spawn_input_writer(Arc::clone(&deps.backend), weak.clone());

    let driver = Driver {
        orchestrator,
        registry: deps.registry,
        secrets: deps.secrets,
        backend: deps.backend,
        prompt: deps.prompt,
        notifier: deps.notifier,
        tx: weak,
        input,
        view: view_tx,
    };
    let task = tokio::spawn(driver.run(rx, subscription));

    (OrchestratorHandle { tx, view: view_rx }, task)
}

/// Keystrokes go through one sequential writer so they reach the backend in
/// the order they were typed
fn spawn_input_writer(
    backend: Arc<dyn SessionBackend>,
    tx: WeakUnboundedSender<Message>,
) -> UnboundedSender<(SessionId, String)> {
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<(SessionId, String)>();
    tokio::spawn(async move {
        while let Some((session_id, data)) = input_rx.recv().await {
            if let Err(err) = backend.send_session_input(&session_id, &data).await {
                let error = SerializableError::from(&err).message;
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(Message::InputFailed { error });
                }
            }
        }
    });
    input_tx
}

struct Driver {
    orchestrator: Orchestrator,
    registry: Arc<ConnectionRegistry>,
    secrets: Arc<SecretCache>,
    backend: Arc<dyn SessionBackend>,
    prompt: Arc<dyn SecretPrompt>,
    notifier: Arc<dyn Notifier>,
    tx: WeakUnboundedSender<Message>,
    input: UnboundedSender<(SessionId, String)>,
    view: watch::Sender<SessionView>,
}

impl Driver {
    async fn run(mut self, mut rx: UnboundedReceiver<Message>, subscription: Subscription) {
        tracing::debug!("Session orchestrator started");

        while let Some(message) = rx.recv().await {
            let teardown = matches!(message, Message::Teardown);
            let effects = self.orchestrator.handle(message);

            if teardown {
                rx.close();
                self.view.send_replace(self.orchestrator.view());
                finish(Arc::clone(&self.backend), effects).await;
                break;
            }
            for effect in effects {
                self.execute(effect);
            }
            self.view.send_replace(self.orchestrator.view());
        }

        if !self.orchestrator.is_torn_down() {
            rx.close();
            let effects = self.orchestrator.handle(Message::Teardown);
            self.view.send_replace(self.orchestrator.view());
            finish(Arc::clone(&self.backend), effects).await;
        }

        // Creates that resolved while closing still own a live session
        while let Some(message) = rx.recv().await {
            if let Message::SessionCreated { session_id, .. } = message {
                tracing::debug!("Closing session {} created during teardown", session_id);
                close_quietly(self.backend.as_ref(), &session_id).await;
            }
        }

        drop(subscription);
        tracing::debug!("Session orchestrator stopped");
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::PromptSecret(connection) => self.prompt_secret(connection),
            Effect::CreateSession {
                request,
                previous,
                secret,
            } => self.create_session(request, previous, secret),
            Effect::CloseSession(session_id) => {
                let backend = Arc::clone(&self.backend);
                tokio::spawn(async move {
                    close_quietly(backend.as_ref(), &session_id).await;
                });
            }
            Effect::SendInput { session_id, data } => {
                if self.input.send((session_id, data)).is_err() {
                    tracing::warn!("Input writer has stopped");
                }
            }
            Effect::MarkConnected(connection_id) => {
                if let Err(e) = self.registry.mark_connected(&connection_id) {
                    tracing::warn!("Failed to record connection time for {}: {}", connection_id, e);
                }
            }
            Effect::Notify(notification) => self.notifier.notify(&notification),
        }
    }

    fn prompt_secret(&self, connection: ConnectionProfile) {
        let prompt = Arc::clone(&self.prompt);
        let secrets = Arc::clone(&self.secrets);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let connection_id = connection.id.clone();
            let message = match prompt.prompt_for_secret(&connection).await {
                PromptOutcome::Submitted(secret) => {
                    secrets.store_secret(&connection_id, secret);
                    Message::SecretSubmitted { connection_id }
                }
                PromptOutcome::Cancelled => Message::SecretCancelled { connection_id },
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(message);
            }
        });
    }

    fn create_session(
        &self,
        request: ConnectRequest,
        previous: Option<SessionId>,
        secret: Option<SessionSecret>,
    ) {
        let backend = Arc::clone(&self.backend);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            if let Some(previous) = previous {
                close_quietly(backend.as_ref(), &previous).await;
            }

            match backend
                .create_shell_session(&request.connection_id, secret)
                .await
            {
                Ok(session_id) => {
                    let delivered = tx.upgrade().map_or(false, |tx| {
                        tx.send(Message::SessionCreated {
                            request,
                            session_id: session_id.clone(),
                        })
                        .is_ok()
                    });
                    if !delivered {
                        tracing::debug!("Orchestrator gone; closing orphan session {}", session_id);
                        close_quietly(backend.as_ref(), &session_id).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        "Session create for {} failed: {}",
                        request.connection_id,
                        logging::sanitize(&err.to_string())
                    );
                    let error = SerializableError::from(&err).message;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Message::SessionCreateFailed { request, error });
                    }
                }
            }
        });
    }
}

/// Teardown closes inline so the session is gone before the loop returns
async fn finish(backend: Arc<dyn SessionBackend>, effects: Vec<Effect>) {
    for effect in effects {
        if let Effect::CloseSession(session_id) = effect {
            close_quietly(backend.as_ref(), &session_id).await;
        }
    }
}

/// Best-effort close; failures are only logged
async fn close_quietly(backend: &dyn SessionBackend, session_id: &str) {
    if let Err(e) = backend.close_shell_session(session_id).await {
        tracing::debug!("Ignoring close failure for {}: {}", session_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::InMemoryConnectionStore;
    use crate::session::state::ConnectionState;
    use crate::terminal::testing::RecordingSink;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct EchoBackend {
        closed: Mutex<Vec<String>>,
        inputs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionBackend for EchoBackend {
        async fn create_shell_session(
            &self,
            connection_id: &str,
            _secret: Option<SessionSecret>,
        ) -> AppResult<SessionId> {
            Ok(format!("s-{}", connection_id))
        }

        async fn send_session_input(&self, _session_id: &str, data: &str) -> AppResult<()> {
            if data == "fail" {
                return Err(AppError::Backend("broken pipe".into()));
            }
            self.inputs.lock().push(data.to_string());
            Ok(())
        }

        async fn close_shell_session(&self, session_id: &str) -> AppResult<()> {
            self.closed.lock().push(session_id.to_string());
            Ok(())
        }
    }

    struct CancelPrompt;

    #[async_trait]
    impl SecretPrompt for CancelPrompt {
        async fn prompt_for_secret(&self, _connection: &ConnectionProfile) -> PromptOutcome {
            PromptOutcome::Cancelled
        }
    }

    fn start(backend: Arc<EchoBackend>) -> (OrchestratorHandle, JoinHandle<()>, RecordingSink) {
        let registry = Arc::new(
            ConnectionRegistry::new(Arc::new(InMemoryConnectionStore::with_fixtures())).unwrap(),
        );
        let sink = RecordingSink::default();
        let (handle, task) = spawn_orchestrator(
            OrchestratorDeps {
                config: OrchestratorConfig::default(),
                registry,
                secrets: Arc::new(SecretCache::new()),
                backend,
                bus: SessionEventBus::new(),
                prompt: Arc::new(CancelPrompt),
                notifier: Arc::new(TracingNotifier),
            },
            Box::new(sink.clone()),
        );
        (handle, task, sink)
    }

    async fn wait_for(handle: &OrchestratorHandle, f: impl FnMut(&SessionView) -> bool) -> SessionView {
        let mut rx = handle.watch_view();
        let view = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(f))
            .await
            .unwrap()
            .unwrap()
            .clone();
        view
    }

    #[tokio::test]
    async fn test_cancelled_prompt_blocks_connection() {
        let backend = Arc::new(EchoBackend::default());
        let (handle, _task, sink) = start(Arc::clone(&backend));
        handle.terminal_ready(true).unwrap();
        handle.connect("conn-analytics").unwrap();

        let view = wait_for(&handle, |v| v.blocked_connection_id.is_some()).await;
        assert_eq!(view.state, ConnectionState::Idle);
        assert!(sink.transcript().contains("已取消连接"));
        assert!(backend.closed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_input_order_and_failure() {
        let backend = Arc::new(EchoBackend::default());
        let mut settings = crate::config::OrchestratorSettings::default();
        settings.secret_required_protocols.clear();
        let registry = Arc::new(
            ConnectionRegistry::new(Arc::new(InMemoryConnectionStore::with_fixtures())).unwrap(),
        );
        let sink = RecordingSink::default();
        let (handle, _task) = spawn_orchestrator(
            OrchestratorDeps {
                config: OrchestratorConfig {
                    backend_available: true,
                    settings,
                },
                registry,
                secrets: Arc::new(SecretCache::new()),
                backend: Arc::clone(&backend) as Arc<dyn SessionBackend>,
                bus: SessionEventBus::new(),
                prompt: Arc::new(CancelPrompt),
                notifier: Arc::new(TracingNotifier),
            },
            Box::new(sink.clone()),
        );
        handle.terminal_ready(true).unwrap();
        handle.connect("conn-prod-api").unwrap();
        wait_for(&handle, |v| v.state == ConnectionState::Active).await;

        for key in ["l", "s", "\n", "fail"] {
            handle.send_input(key).unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), async {
            while !sink.transcript().contains("命令发送失败: broken pipe") {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*backend.inputs.lock(), vec!["l", "s", "\n"]);
    }

    #[tokio::test]
    async fn test_dropping_handles_tears_down() {
        let backend = Arc::new(EchoBackend::default());
        let (handle, task, _sink) = start(Arc::clone(&backend));
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_prompt_joins_open_one() {
        let responders = PromptResponders::new();
        let (first_rx, first) = responders.register("conn-analytics");
        let (second_rx, second) = responders.register("conn-analytics");
        assert!(first);
        assert!(!second);
        assert!(responders.is_open("conn-analytics"));

        let secret = Secret::new("pw").unwrap();
        assert!(responders.resolve("conn-analytics", PromptOutcome::Submitted(secret)));
        assert!(matches!(first_rx.await, Ok(PromptOutcome::Submitted(_))));
        assert!(matches!(second_rx.await, Ok(PromptOutcome::Submitted(_))));
        assert!(!responders.is_open("conn-analytics"));
        assert!(!responders.resolve("conn-analytics", PromptOutcome::Cancelled));
    }
}
