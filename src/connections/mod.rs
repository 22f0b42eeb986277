#[cfg(feature = "desktop")]
pub mod commands;
pub mod store;

pub use store::*;

use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Transport protocol of a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Sftp,
    Ftp,
}

impl Protocol {
    /// Unknown labels fall back to ssh
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "sftp" => Protocol::Sftp,
            "ftp" => Protocol::Ftp,
            _ => Protocol::Ssh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Ssh => "ssh",
            Protocol::Sftp => "sftp",
            Protocol::Ftp => "ftp",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    #[default]
    Password,
    PrivateKey,
    Agent,
}

/// Health label shown next to a profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionHealth {
    Healthy,
    Deploying,
    Connected,
    #[default]
    Idle,
}

/// Connection profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub status: ConnectionHealth,
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Payload for creating a profile
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConnection {
    pub name: String,
    pub host: String,
    pub username: String,
    pub protocol: String,
    pub port: u16,
}

/// Payload for editing a profile
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    pub id: String,
    pub name: String,
    pub host: String,
    pub username: String,
    pub protocol: String,
    pub port: u16,
}

pub(crate) fn validate_fields(name: &str, host: &str, username: &str, port: u16) -> AppResult<()> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidConfig("Connection name is required".to_string()));
    }
    if host.trim().is_empty() {
        return Err(AppError::InvalidConfig("Host is required".to_string()));
    }
    if username.trim().is_empty() {
        return Err(AppError::InvalidConfig("Username is required".to_string()));
    }
    if port == 0 {
        return Err(AppError::InvalidConfig("Port must be between 1 and 65535".to_string()));
    }
    Ok(())
}

/// Ordered profiles plus the operator's current selection.
///
/// The list is a cache of the store; every mutation goes through the store
/// and then refreshes.
pub struct ConnectionRegistry {
    store: Arc<dyn ConnectionStore>,
    items: RwLock<Vec<ConnectionProfile>>,
    selected_id: RwLock<Option<String>>,
}

impl ConnectionRegistry {
    pub fn new(store: Arc<dyn ConnectionStore>) -> AppResult<Self> {
        let items = store.list_connections()?;
        Ok(Self {
            store,
            items: RwLock::new(items),
            selected_id: RwLock::new(None),
        })
    }

    pub fn refresh(&self) -> AppResult<()> {
        let items = self.store.list_connections()?;
        *self.items.write() = items;
        Ok(())
    }

    pub fn list(&self) -> Vec<ConnectionProfile> {
        self.items.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<ConnectionProfile> {
        self.items.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn selected_id(&self) -> Option<String> {
        self.selected_id.read().clone()
    }

    /// Select a profile; returns the new active id when it changed
    pub fn select(&self, id: &str) -> AppResult<Option<String>> {
        if self.get(id).is_none() {
            return Err(AppError::ProfileNotFound(id.to_string()));
        }
        let before = self.active().map(|c| c.id);
        *self.selected_id.write() = Some(id.to_string());
        let after = self.active().map(|c| c.id);
        Ok(if before != after { after } else { None })
    }

    /// The selected profile, or the first one when nothing valid is selected
    pub fn active(&self) -> Option<ConnectionProfile> {
        let items = self.items.read();
        let selected = self.selected_id.read();
        selected
            .as_deref()
            .and_then(|id| items.iter().find(|c| c.id == id))
            .or_else(|| items.first())
            .cloned()
    }

    pub fn create(&self, payload: NewConnection) -> AppResult<ConnectionProfile> {
        let created = self.store.create_connection(payload)?;
        self.refresh()?;
        Ok(created)
    }

    pub fn update(&self, update: ConnectionUpdate) -> AppResult<ConnectionProfile> {
        let updated = self.store.update_connection(update)?;
        self.refresh()?;
        Ok(updated)
    }

    pub fn delete(&self, id: &str) -> AppResult<()> {
        self.store.delete_connection(id)?;
        {
            let mut selected = self.selected_id.write();
            if selected.as_deref() == Some(id) {
                *selected = None;
            }
        }
        self.refresh()
    }

    pub fn mark_connected(&self, id: &str) -> AppResult<()> {
        self.store.mark_connected(id, Utc::now())?;
        self.refresh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Arc::new(InMemoryConnectionStore::with_fixtures())).unwrap()
    }

    #[test]
    fn test_protocol_labels() {
        assert_eq!(Protocol::from_label("sftp"), Protocol::Sftp);
        assert_eq!(Protocol::from_label("FTP"), Protocol::Ftp);
        assert_eq!(Protocol::from_label("telnet"), Protocol::Ssh);
    }

    #[test]
    fn test_profile_wire_format() {
        let registry = registry();
        let profile = registry.get("conn-prod-api").unwrap();
        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["protocol"], "ssh");
        assert_eq!(json["authType"], "privateKey");
        assert_eq!(json["groupName"], "Production");
        assert_eq!(json["status"], "healthy");
    }

    #[test]
    fn test_active_defaults_to_first() {
        let registry = registry();
        assert_eq!(registry.active().unwrap().id, "conn-prod-api");
    }

    #[test]
    fn test_select_reports_change_once() {
        let registry = registry();
        assert_eq!(
            registry.select("conn-analytics").unwrap(),
            Some("conn-analytics".to_string())
        );
        assert_eq!(registry.select("conn-analytics").unwrap(), None);
        assert!(registry.select("conn-missing").is_err());
    }

    #[test]
    fn test_delete_selected_falls_back_to_first() {
        let registry = registry();
        registry.select("conn-analytics").unwrap();
        registry.delete("conn-analytics").unwrap();
        assert!(registry.selected_id().is_none());
        assert_eq!(registry.active().unwrap().id, "conn-prod-api");
    }

    #[test]
    fn test_create_validates_payload() {
        let registry = registry();
        let err = registry
            .create(NewConnection {
                name: "edge".into(),
                host: "10.0.0.1".into(),
                username: "ops".into(),
                protocol: "ssh".into(),
                port: 0,
            })
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidConfig(_)));
    }
}
