use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub shell: ShellSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Transcript strings and gating rules used while driving a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    /// stderr payloads starting with this are surfaced as a remote fault
    #[serde(default = "default_fatal_error_prefix")]
    pub fatal_error_prefix: String,
    #[serde(default = "default_session_ended_message")]
    pub session_ended_message: String,
    #[serde(default = "default_cancelled_message")]
    pub cancelled_message: String,
    #[serde(default = "default_input_failed_prefix")]
    pub input_failed_prefix: String,
    /// Protocols that need a one-time password before a session is created
    #[serde(default = "default_secret_required_protocols")]
    pub secret_required_protocols: Vec<String>,
    /// Transcript shown instead of a session when no backend is reachable
    #[serde(default = "default_fallback_lines")]
    pub fallback_lines: Vec<String>,
}

fn default_fatal_error_prefix() -> String {
    "SSH 会话错误".to_string()
}

fn default_session_ended_message() -> String {
    "会话已结束".to_string()
}

fn default_cancelled_message() -> String {
    "已取消连接".to_string()
}

fn default_input_failed_prefix() -> String {
    "命令发送失败".to_string()
}

fn default_secret_required_protocols() -> Vec<String> {
    vec!["ssh".to_string()]
}

fn default_fallback_lines() -> Vec<String> {
    vec![
        "termlink 当前运行在预览模式。".to_string(),
        "请运行桌面应用以获得真实会话。".to_string(),
    ]
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            fatal_error_prefix: default_fatal_error_prefix(),
            session_ended_message: default_session_ended_message(),
            cancelled_message: default_cancelled_message(),
            input_failed_prefix: default_input_failed_prefix(),
            secret_required_protocols: default_secret_required_protocols(),
            fallback_lines: default_fallback_lines(),
        }
    }
}

/// Local shell spawned by the bundled backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSettings {
    #[serde(default = "default_shell_program")]
    pub program: String,
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
}

#[cfg(target_os = "windows")]
fn default_shell_program() -> String {
    "cmd".to_string()
}

#[cfg(not(target_os = "windows"))]
fn default_shell_program() -> String {
    "/bin/sh".to_string()
}

#[cfg(target_os = "windows")]
fn default_shell_args() -> Vec<String> {
    vec!["/K".to_string()]
}

#[cfg(not(target_os = "windows"))]
fn default_shell_args() -> Vec<String> {
    vec!["-i".to_string()]
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: default_shell_program(),
            args: default_shell_args(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_ring_buffer_lines")]
    pub ring_buffer_lines: usize,
}

fn default_filter() -> String {
    "termlink=info,warn".to_string()
}

fn default_ring_buffer_lines() -> usize {
    10_000
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            ring_buffer_lines: default_ring_buffer_lines(),
        }
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}
