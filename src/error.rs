use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Serializable error for frontend
#[derive(Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (code, message, details) = match err {
            AppError::Backend(msg) => ("BACKEND_ERROR", msg.clone(), None),
            AppError::Connection(msg) => ("CONNECTION_ERROR", msg.clone(), None),
            AppError::Auth(msg) => ("AUTH_ERROR", "Authentication failed".to_string(), Some(msg.clone())),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::Io(e) => ("IO_ERROR", e.to_string(), None),
            AppError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone(), None),
            AppError::SessionNotFound(id) => ("SESSION_NOT_FOUND", format!("Session {} not found", id), None),
            AppError::ProfileNotFound(id) => ("PROFILE_NOT_FOUND", format!("Profile {} not found", id), None),
            AppError::InvalidConfig(msg) => ("INVALID_CONFIG", msg.clone(), None),
            AppError::InvalidInput(msg) => ("INVALID_INPUT", msg.clone(), None),
            AppError::Unknown(msg) => ("UNKNOWN_ERROR", msg.clone(), None),
        };

        SerializableError {
            code: code.to_string(),
            message,
            details,
        }
    }
}

// Tauri commands return AppError directly, so it has to serialize
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unknown(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
