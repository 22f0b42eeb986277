pub mod config;
pub mod connections;
pub mod error;
pub mod logging;
pub mod secrets;
pub mod session;
pub mod state;
pub mod terminal;

#[cfg(feature = "desktop")]
pub use desktop::create_app;

#[cfg(feature = "desktop")]
mod desktop {
    use crate::config::{self, AppSettings};
    use crate::session::commands::{
        forward_view, EventForwarder, TauriNotifier, TauriSecretPrompt, TauriTerminalSink,
    };
    use crate::state::AppState;
    use crate::{connections, logging, session, terminal};
    use std::sync::Arc;
    use tauri::Manager;

    /// Create and configure the Tauri application
    pub fn create_app() -> tauri::Builder<tauri::Wry> {
        tauri::Builder::default()
            .setup(|app| {
                let config_dir = config::get_config_dir()?;
                std::fs::create_dir_all(&config_dir)?;

                tracing::info!("termlink config dir: {:?}", config_dir);

                let settings = AppSettings::load(&config_dir)?;

                logging::init_log_manager(config_dir.clone(), settings.logging.ring_buffer_lines)
                    .map_err(|e| anyhow::anyhow!("Failed to initialize log manager: {}", e))?;

                let handle = app.handle().clone();
                let prompts = Arc::new(TauriSecretPrompt::new(handle.clone()));
                let state = tauri::async_runtime::block_on(async {
                    AppState::new(
                        settings,
                        Box::new(TauriTerminalSink::new(handle.clone())),
                        prompts.clone(),
                        Arc::new(TauriNotifier::new(handle.clone())),
                    )
                })?;

                forward_view(handle.clone(), &state.orchestrator);
                app.manage(EventForwarder::new(handle, &state.bus));
                app.manage(prompts);
                app.manage(Arc::new(state));

                tracing::info!("termlink initialized successfully");

                Ok(())
            })
            .on_window_event(|window, event| {
                if let tauri::WindowEvent::Destroyed = event {
                    if let Some(state) = window.try_state::<Arc<AppState>>() {
                        if state.orchestrator.shutdown().is_err() {
                            tracing::debug!("Orchestrator already stopped");
                        }
                    }
                }
            })
            .invoke_handler(tauri::generate_handler![
                // Connection registry
                connections::commands::list_connections,
                connections::commands::create_connection,
                connections::commands::update_connection,
                connections::commands::delete_connection,
                connections::commands::select_connection,
                // Session orchestrator
                session::commands::connect_session,
                session::commands::connect_selected,
                session::commands::submit_secret,
                session::commands::cancel_secret,
                session::commands::send_session_input,
                session::commands::terminal_ready,
                session::commands::get_session_view,
                session::commands::list_session_summaries,
                // Local console
                terminal::commands::run_local_command,
                // Logs
                logging::commands::get_recent_logs,
                logging::commands::clear_log_view,
                logging::commands::get_logs_dir,
            ])
    }
}
