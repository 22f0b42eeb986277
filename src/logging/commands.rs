use super::{get_log_manager, LogFilter, LogLine};
use crate::error::{AppError, AppResult};

/// Upper bound for a single query
const MAX_QUERY_LINES: u32 = 10_000;

/// Get recent logs from the ring buffer
#[tauri::command]
pub async fn get_recent_logs(
    max_lines: Option<u32>,
    filter: Option<LogFilter>,
) -> AppResult<Vec<LogLine>> {
    let manager = get_log_manager()
        .ok_or_else(|| AppError::Config("Log manager not initialized".to_string()))?;

    let lines = max_lines.unwrap_or(1000).min(MAX_QUERY_LINES);
    Ok(manager.get_recent_logs(lines, filter))
}

/// Clear the in-memory log view (does not delete file logs)
#[tauri::command]
pub async fn clear_log_view() -> AppResult<()> {
    let manager = get_log_manager()
        .ok_or_else(|| AppError::Config("Log manager not initialized".to_string()))?;

    manager.clear_view();
    Ok(())
}

#[tauri::command]
pub async fn get_logs_dir() -> AppResult<String> {
    let manager = get_log_manager()
        .ok_or_else(|| AppError::Config("Log manager not initialized".to_string()))?;

    Ok(manager.get_logs_dir().to_string_lossy().to_string())
}
