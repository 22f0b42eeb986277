use super::command;
use crate::error::AppResult;
use crate::state::AppState;
use serde::Deserialize;
use std::sync::Arc;
use tauri::State;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalCommandPayload {
    pub command: String,
    /// Connection the console was opened from, for the log only
    #[serde(default)]
    pub connection_id: Option<String>,
}

#[tauri::command]
pub async fn run_local_command(
    state: State<'_, Arc<AppState>>,
    payload: LocalCommandPayload,
) -> AppResult<String> {
    if let Some(connection_id) = &payload.connection_id {
        tracing::debug!("Local command from the {} console", connection_id);
    }
    let shell = state.settings.read().shell.clone();
    command::run_local_command(&shell, &payload.command).await
}
