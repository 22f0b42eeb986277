//! Bundled backend that runs a local shell per session.
//!
//! Output is published the moment it is read, before and after the caller
//! has seen the new session id; the orchestrator holds back events for an
//! attempt that is still connecting.

use super::{OutputStream, SessionBackend, SessionEvent, SessionEventBus, SessionId, SessionSecret};
use crate::config::ShellSettings;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

/// First line written to every new session
pub const SHELL_STARTED_BANNER: &str = "本地 shell 已启动";

const READ_CHUNK: usize = 4096;

struct LocalSession {
    connection_id: String,
    stdin: Mutex<ChildStdin>,
    kill: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalSession {
    fn kill(&self) {
        if let Some(kill) = self.kill.lock().take() {
            let _ = kill.send(());
        }
    }
}

pub struct LocalShellBackend {
    settings: ShellSettings,
    bus: Arc<SessionEventBus>,
    sessions: Arc<DashMap<SessionId, Arc<LocalSession>>>,
}

impl LocalShellBackend {
    pub fn new(settings: ShellSettings, bus: Arc<SessionEventBus>) -> Self {
        Self {
            settings,
            bus,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[async_trait]
impl SessionBackend for LocalShellBackend {
    async fn create_shell_session(
        &self,
        connection_id: &str,
        _secret: Option<SessionSecret>,
    ) -> AppResult<SessionId> {
        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Backend(format!("Failed to start {}: {}", self.settings.program, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Backend("Shell stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Backend("Shell stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let session_id = format!("session-{}", Uuid::new_v4().simple());
        let (kill_tx, kill_rx) = oneshot::channel();
        self.sessions.insert(
            session_id.clone(),
            Arc::new(LocalSession {
                connection_id: connection_id.to_string(),
                stdin: Mutex::new(stdin),
                kill: parking_lot::Mutex::new(Some(kill_tx)),
            }),
        );

        tracing::info!(
            "Started local shell {} for connection {}",
            session_id,
            connection_id
        );

        self.bus.publish(SessionEvent::data(
            session_id.clone(),
            OutputStream::Stdout,
            format!("{}\r\n", SHELL_STARTED_BANNER),
        ));

        let exited = tokio::spawn(wait_for_exit(child, kill_rx));

        let stderr_pump = stderr.map(|stderr| {
            tokio::spawn(pump(
                Arc::clone(&self.bus),
                session_id.clone(),
                OutputStream::Stderr,
                stderr,
            ))
        });

        let bus = Arc::clone(&self.bus);
        let sessions = Arc::clone(&self.sessions);
        let id = session_id.clone();
        tokio::spawn(async move {
            pump(Arc::clone(&bus), id.clone(), OutputStream::Stdout, stdout).await;
            if let Some(stderr_pump) = stderr_pump {
                let _ = stderr_pump.await;
            }

            match exited.await {
                Ok(Some(status)) => tracing::info!("Local shell {} exited with {}", id, status),
                Ok(None) => tracing::debug!("Local shell {} exit status unavailable", id),
                Err(e) => tracing::debug!("Local shell {} waiter failed: {}", id, e),
            }
            sessions.remove(&id);
            bus.publish(SessionEvent::closed(id));
        });

        Ok(session_id)
    }

    async fn send_session_input(&self, session_id: &str, data: &str) -> AppResult<()> {
        let session = self
            .sessions
            .get(session_id)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;

        let mut stdin = session.stdin.lock().await;
        stdin.write_all(data.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn close_shell_session(&self, session_id: &str) -> AppResult<()> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Ok(());
        };

        session.kill();
        tracing::info!(
            "Closed local shell {} ({})",
            session_id,
            session.connection_id
        );
        Ok(())
    }
}

/// Reap the child, killing it first if asked to
async fn wait_for_exit(mut child: Child, kill: oneshot::Receiver<()>) -> Option<ExitStatus> {
    let exited = tokio::select! {
        status = child.wait() => status.ok(),
        _ = kill => None,
    };
    if exited.is_some() {
        return exited;
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Local shell already gone: {}", e);
    }
    child.wait().await.ok()
}

/// Publish whatever `reader` yields as soon as it arrives. Prompts without
/// a trailing newline are not held back.
async fn pump<R>(bus: Arc<SessionEventBus>, session_id: SessionId, stream: OutputStream, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = OutputDecoder::default();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() {
                    bus.publish(SessionEvent::data(session_id.clone(), stream, text));
                }
            }
            Err(e) => {
                tracing::debug!("Read error on {} {:?}: {}", session_id, stream, e);
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        bus.publish(SessionEvent::data(session_id, stream, rest));
    }
}

/// Turns raw pipe reads into terminal text. A UTF-8 sequence split across
/// reads is carried over, and bare `\n` becomes `\r\n`.
#[derive(Default)]
struct OutputDecoder {
    partial: Vec<u8>,
    after_cr: bool,
}

impl OutputDecoder {
    fn push(&mut self, bytes: &[u8]) -> String {
        self.partial.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.partial) {
            Ok(_) => self.partial.len(),
            // Incomplete sequence at the end
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.partial.len(),
        };
        let head: Vec<u8> = self.partial.drain(..complete).collect();
        self.terminate_lines(&String::from_utf8_lossy(&head))
    }

    fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.partial);
        self.terminate_lines(&String::from_utf8_lossy(&rest))
    }

    fn terminate_lines(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for ch in text.chars() {
            if ch == '\n' && !self.after_cr {
                out.push('\r');
            }
            self.after_cr = ch == '\r';
            out.push(ch);
        }
        out
    }
}
