use super::{ConnectionProfile, ConnectionUpdate, NewConnection};
use crate::error::AppResult;
use crate::state::AppState;
use std::sync::Arc;
use tauri::State;

#[tauri::command]
pub async fn list_connections(state: State<'_, Arc<AppState>>) -> AppResult<Vec<ConnectionProfile>> {
    state.registry.refresh()?;
    Ok(state.registry.list())
}

#[tauri::command]
pub async fn create_connection(
    state: State<'_, Arc<AppState>>,
    payload: NewConnection,
) -> AppResult<ConnectionProfile> {
    tracing::info!("Creating connection {}", payload.name);
    state.registry.create(payload)
}

#[tauri::command]
pub async fn update_connection(
    state: State<'_, Arc<AppState>>,
    payload: ConnectionUpdate,
) -> AppResult<ConnectionProfile> {
    tracing::info!("Updating connection {}", payload.id);
    state.registry.update(payload)
}

#[tauri::command]
pub async fn delete_connection(state: State<'_, Arc<AppState>>, id: String) -> AppResult<()> {
    tracing::info!("Deleting connection {}", id);
    let before = state.registry.active().map(|c| c.id);
    state.registry.delete(&id)?;

    let after = state.registry.active().map(|c| c.id);
    if before != after {
        state.orchestrator.active_connection_changed(after)?;
    }
    Ok(())
}

/// Make a profile the active one
#[tauri::command]
pub async fn select_connection(state: State<'_, Arc<AppState>>, id: String) -> AppResult<()> {
    if let Some(active) = state.registry.select(&id)? {
        tracing::debug!("Active connection is now {}", active);
        state.orchestrator.active_connection_changed(Some(active))?;
    }
    Ok(())
}
