//! One-time connection credentials
//!
//! SECURITY: secrets live only in this process. Nothing here is written to
//! disk, and `Secret` never prints its value through `Debug` or `Display`.

use crate::error::{AppError, AppResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;

/// A credential string that redacts itself when formatted
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Blank input is rejected the same way the password prompt rejects it
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Auth("请输入密码".to_string()));
        }
        Ok(Self(value))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Process-wide map of connection id to its cached secret.
///
/// Only the secret prompt path writes here; the orchestrator reads.
#[derive(Default)]
pub struct SecretCache {
    secrets: RwLock<HashMap<String, Secret>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or overwrite) the secret for a connection
    pub fn store_secret(&self, connection_id: &str, secret: Secret) {
        self.secrets.write().insert(connection_id.to_string(), secret);
        tracing::debug!("Cached secret for connection {}", connection_id);
    }

    pub fn get_secret(&self, connection_id: &str) -> Option<Secret> {
        self.secrets.read().get(connection_id).cloned()
    }

    pub fn has_secret(&self, connection_id: &str) -> bool {
        self.secrets.read().contains_key(connection_id)
    }

    pub fn delete_secret(&self, connection_id: &str) -> bool {
        self.secrets.write().remove(connection_id).is_some()
    }

    pub fn clear(&self) {
        self.secrets.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_secret_rejected() {
        assert!(Secret::new("").is_err());
        assert!(Secret::new("   ").is_err());
        assert!(Secret::new("hunter2").is_ok());
    }

    #[test]
    fn test_secret_formatting_is_redacted() {
        let secret = Secret::new("hunter2").unwrap();
        assert!(!format!("{:?}", secret).contains("hunter2"));
        assert!(!format!("{}", secret).contains("hunter2"));
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_store_overwrites_existing_secret() {
        let cache = SecretCache::new();
        cache.store_secret("conn-a", Secret::new("first").unwrap());
        cache.store_secret("conn-a", Secret::new("second").unwrap());

        assert_eq!(cache.get_secret("conn-a").unwrap().expose(), "second");
        assert!(!cache.has_secret("conn-b"));
    }

    #[test]
    fn test_delete_and_clear() {
        let cache = SecretCache::new();
        cache.store_secret("conn-a", Secret::new("a").unwrap());
        cache.store_secret("conn-b", Secret::new("b").unwrap());

        assert!(cache.delete_secret("conn-a"));
        assert!(!cache.delete_secret("conn-a"));
        cache.clear();
        assert!(!cache.has_secret("conn-b"));
    }
}
