use crate::config::AppSettings;
use crate::connections::{ConnectionRegistry, InMemoryConnectionStore};
use crate::error::AppResult;
use crate::secrets::SecretCache;
use crate::session::{
    spawn_orchestrator, LocalShellBackend, Notifier, OrchestratorConfig, OrchestratorDeps,
    OrchestratorHandle, SecretPrompt, SessionBackend, SessionEventBus,
};
use crate::terminal::TerminalSink;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Global application state
pub struct AppState {
    pub settings: Arc<RwLock<AppSettings>>,
    pub registry: Arc<ConnectionRegistry>,
    pub secrets: Arc<SecretCache>,
    pub bus: Arc<SessionEventBus>,
    pub backend: Arc<dyn SessionBackend>,
    pub orchestrator: OrchestratorHandle,
    orchestrator_task: Mutex<Option<JoinHandle<()>>>,
}

impl AppState {
    /// Wire the stores, the local shell backend and a running orchestrator.
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: AppSettings,
        sink: Box<dyn TerminalSink>,
        prompt: Arc<dyn SecretPrompt>,
        notifier: Arc<dyn Notifier>,
    ) -> AppResult<Self> {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(
            InMemoryConnectionStore::with_fixtures(),
        ))?);
        let secrets = Arc::new(SecretCache::new());
        let bus = SessionEventBus::new();
        let backend: Arc<dyn SessionBackend> = Arc::new(LocalShellBackend::new(
            settings.shell.clone(),
            Arc::clone(&bus),
        ));

        let (orchestrator, task) = spawn_orchestrator(
            OrchestratorDeps {
                config: OrchestratorConfig {
                    backend_available: true,
                    settings: settings.orchestrator.clone(),
                },
                registry: Arc::clone(&registry),
                secrets: Arc::clone(&secrets),
                backend: Arc::clone(&backend),
                bus: Arc::clone(&bus),
                prompt,
                notifier,
            },
            sink,
        );

        tracing::info!("Loaded {} connection profiles", registry.list().len());

        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            registry,
            secrets,
            bus,
            backend,
            orchestrator,
            orchestrator_task: Mutex::new(Some(task)),
        })
    }

    /// Tear the orchestrator down and wait for its session to close
    pub async fn shutdown(&self) {
        if self.orchestrator.shutdown().is_err() {
            tracing::debug!("Orchestrator already stopped");
        }
        let task = self.orchestrator_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("Orchestrator task failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionProfile;
    use crate::session::{PromptOutcome, TracingNotifier};
    use crate::terminal::testing::RecordingSink;
    use async_trait::async_trait;

    struct NoPrompt;

    #[async_trait]
    impl SecretPrompt for NoPrompt {
        async fn prompt_for_secret(&self, _connection: &ConnectionProfile) -> PromptOutcome {
            PromptOutcome::Cancelled
        }
    }

    #[tokio::test]
    async fn test_state_wires_fixtures_and_shuts_down() {
        let state = AppState::new(
            AppSettings::default(),
            Box::new(RecordingSink::default()),
            Arc::new(NoPrompt),
            Arc::new(TracingNotifier),
        )
        .unwrap();

        assert_eq!(state.registry.list().len(), 4);
        assert_eq!(state.bus.subscriber_count(), 1);

        state.shutdown().await;
        assert!(state.orchestrator.connect("conn-prod-api").is_err());
        assert_eq!(state.bus.subscriber_count(), 0);
    }
}
