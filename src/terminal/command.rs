//! One-shot commands from the local console

use crate::config::ShellSettings;
use crate::error::{AppError, AppResult};
use crate::logging;
use tokio::process::Command;

pub const EMPTY_COMMAND: &str = "命令不能为空";
pub const NO_OUTPUT: &str = "(命令执行成功，但无输出)";

#[cfg(target_os = "windows")]
const ONE_SHOT_FLAG: &str = "/C";

#[cfg(not(target_os = "windows"))]
const ONE_SHOT_FLAG: &str = "-c";

/// Run `command` through the configured shell and return stdout followed by
/// stderr. A non-zero exit is not an error; its output is returned as is.
pub async fn run_local_command(shell: &ShellSettings, command: &str) -> AppResult<String> {
    if command.trim().is_empty() {
        return Err(AppError::InvalidInput(EMPTY_COMMAND.to_string()));
    }

    tracing::debug!("Running local command: {}", logging::sanitize(command));
    let output = Command::new(&shell.program)
        .arg(ONE_SHOT_FLAG)
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await?;

    let mut result = String::new();
    if !output.stdout.is_empty() {
        result.push_str(&String::from_utf8_lossy(&output.stdout));
    }
    if !output.stderr.is_empty() {
        if !result.is_empty() {
            result.push('\n');
        }
        result.push_str(&String::from_utf8_lossy(&output.stderr));
    }

    if result.trim().is_empty() {
        result.push_str(NO_OUTPUT);
    }
    if !output.status.success() {
        tracing::info!("Local command exited with {}", output.status);
    }
    Ok(result)
}
