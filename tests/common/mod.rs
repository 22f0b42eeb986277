#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use termlink::config::OrchestratorSettings;
use termlink::connections::{ConnectionProfile, ConnectionRegistry, InMemoryConnectionStore};
use termlink::error::{AppError, AppResult};
use termlink::secrets::{Secret, SecretCache};
use termlink::session::{
    spawn_orchestrator, Notification, Notifier, OrchestratorConfig, OrchestratorDeps,
    OrchestratorHandle, PromptOutcome, SecretPrompt, SessionBackend, SessionEventBus, SessionId,
    SessionSecret, SessionView,
};
use termlink::terminal::TerminalSink;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Terminal that keeps everything it was given
#[derive(Clone, Default)]
pub struct Transcript {
    chunks: Arc<Mutex<Vec<String>>>,
    clears: Arc<Mutex<usize>>,
}

impl Transcript {
    pub fn text(&self) -> String {
        self.chunks.lock().concat()
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock()
    }

    pub async fn wait_for(&self, needle: &str) {
        tokio::time::timeout(TIMEOUT, async {
            while !self.text().contains(needle) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("transcript never contained {:?}: {:?}", needle, self.text()));
    }
}

impl TerminalSink for Transcript {
    fn write(&mut self, chunk: &str) {
        self.chunks.lock().push(chunk.to_string());
    }

    fn clear(&mut self) {
        self.chunks.lock().clear();
        *self.clears.lock() += 1;
    }
}

/// Prompt that answers from a script and counts how often it was opened
#[derive(Default)]
pub struct ScriptedPrompt {
    answers: Mutex<VecDeque<Option<String>>>,
    pub opened: Mutex<Vec<String>>,
}

impl ScriptedPrompt {
    /// `Some(password)` submits, `None` cancels
    pub fn answering(answers: Vec<Option<&str>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(String::from)).collect()),
            opened: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl SecretPrompt for ScriptedPrompt {
    async fn prompt_for_secret(&self, connection: &ConnectionProfile) -> PromptOutcome {
        self.opened.lock().push(connection.id.clone());
        let answer = self.answers.lock().pop_front().flatten();
        match answer.map(Secret::new) {
            Some(Ok(secret)) => PromptOutcome::Submitted(secret),
            _ => PromptOutcome::Cancelled,
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.seen.lock().push(notification.clone());
    }
}

/// How one `create_shell_session` call resolves
pub struct CreateScript {
    pub connection_id: Option<String>,
    pub gate: Option<oneshot::Receiver<()>>,
    pub result: AppResult<SessionId>,
}

impl CreateScript {
    pub fn ok(session_id: &str) -> Self {
        Self {
            connection_id: None,
            gate: None,
            result: Ok(session_id.to_string()),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            connection_id: None,
            gate: None,
            result: Err(AppError::Connection(message.to_string())),
        }
    }

    /// Resolves only after the returned sender fires
    pub fn gated(session_id: &str) -> (Self, oneshot::Sender<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                connection_id: None,
                gate: Some(rx),
                result: Ok(session_id.to_string()),
            },
            tx,
        )
    }

    /// Only answer create calls for this connection
    pub fn for_connection(mut self, connection_id: &str) -> Self {
        self.connection_id = Some(connection_id.to_string());
        self
    }
}

/// Backend whose create calls follow a script
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<CreateScript>>,
    pub created: Mutex<Vec<(String, Option<String>)>>,
    pub closed: Mutex<Vec<String>>,
    pub inputs: Mutex<Vec<(String, String)>>,
    close_delay: Duration,
}

impl ScriptedBackend {
    pub fn new(script: Vec<CreateScript>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        })
    }

    /// Every close takes `delay` before it is recorded
    pub fn with_close_delay(script: Vec<CreateScript>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            close_delay: delay,
            ..Self::default()
        })
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }

    pub async fn wait_inputs(&self, count: usize) -> Vec<(String, String)> {
        tokio::time::timeout(TIMEOUT, async {
            while self.inputs.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("backend never received {} inputs", count));
        self.inputs.lock().clone()
    }

    pub async fn wait_closed(&self, session_id: &str) {
        tokio::time::timeout(TIMEOUT, async {
            while !self.closed().iter().any(|id| id == session_id) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("{} was never closed", session_id));
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn create_shell_session(
        &self,
        connection_id: &str,
        secret: Option<SessionSecret>,
    ) -> AppResult<SessionId> {
        self.created.lock().push((
            connection_id.to_string(),
            secret.map(|s| s.password.expose().to_string()),
        ));
        let step = {
            let mut script = self.script.lock();
            script
                .iter()
                .position(|step| {
                    step.connection_id
                        .as_deref()
                        .map_or(true, |id| id == connection_id)
                })
                .and_then(|index| script.remove(index))
        };
        let Some(step) = step else {
            return Err(AppError::Backend("no scripted response".into()));
        };
        if let Some(gate) = step.gate {
            let _ = gate.await;
        }
        step.result
    }

    async fn send_session_input(&self, session_id: &str, data: &str) -> AppResult<()> {
        self.inputs.lock().push((session_id.to_string(), data.to_string()));
        Ok(())
    }

    async fn close_shell_session(&self, session_id: &str) -> AppResult<()> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.lock().push(session_id.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub handle: OrchestratorHandle,
    pub task: JoinHandle<()>,
    pub transcript: Transcript,
    pub bus: Arc<SessionEventBus>,
    pub secrets: Arc<SecretCache>,
    pub registry: Arc<ConnectionRegistry>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn start(
    backend: Arc<dyn SessionBackend>,
    bus: Arc<SessionEventBus>,
    prompt: Arc<dyn SecretPrompt>,
    settings: OrchestratorSettings,
) -> Harness {
    let registry = Arc::new(
        ConnectionRegistry::new(Arc::new(InMemoryConnectionStore::with_fixtures())).unwrap(),
    );
    let secrets = Arc::new(SecretCache::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let transcript = Transcript::default();

    let (handle, task) = spawn_orchestrator(
        OrchestratorDeps {
            config: OrchestratorConfig {
                backend_available: true,
                settings,
            },
            registry: Arc::clone(&registry),
            secrets: Arc::clone(&secrets),
            backend,
            bus: Arc::clone(&bus),
            prompt,
            notifier: notifier.clone(),
        },
        Box::new(transcript.clone()),
    );

    Harness {
        handle,
        task,
        transcript,
        bus,
        secrets,
        registry,
        notifier,
    }
}

pub async fn wait_view(
    handle: &OrchestratorHandle,
    what: &str,
    f: impl FnMut(&SessionView) -> bool,
) -> SessionView {
    let mut views = handle.watch_view();
    let view = match tokio::time::timeout(TIMEOUT, views.wait_for(f)).await {
        Ok(Ok(view)) => view.clone(),
        _ => panic!("view never reached {}: {:?}", what, handle.view()),
    };
    view
}
