pub mod backend;
#[cfg(feature = "desktop")]
pub mod commands;
pub mod local;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod summary;

pub use backend::*;
pub use local::LocalShellBackend;
pub use orchestrator::{Effect, Message, Orchestrator, OrchestratorConfig};
pub use runtime::{
    spawn_orchestrator, Notifier, OrchestratorDeps, OrchestratorHandle, PromptOutcome,
    PromptResponders, SecretPrompt, TracingNotifier,
};
pub use state::*;
pub use summary::{summarize, SessionSummary};
