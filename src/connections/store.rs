use super::{
    validate_fields, AuthType, ConnectionHealth, ConnectionProfile, ConnectionUpdate,
    NewConnection, Protocol,
};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Listing and CRUD collaborator behind the registry
pub trait ConnectionStore: Send + Sync {
    fn list_connections(&self) -> AppResult<Vec<ConnectionProfile>>;
    fn create_connection(&self, payload: NewConnection) -> AppResult<ConnectionProfile>;
    fn update_connection(&self, update: ConnectionUpdate) -> AppResult<ConnectionProfile>;
    fn delete_connection(&self, id: &str) -> AppResult<()>;
    fn mark_connected(&self, id: &str, at: DateTime<Utc>) -> AppResult<()>;
}

/// Process-local store; contents are gone when the app exits
#[derive(Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<Vec<ConnectionProfile>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fixtures() -> Self {
        Self {
            connections: RwLock::new(default_connections()),
        }
    }

    pub fn with_connections(connections: Vec<ConnectionProfile>) -> Self {
        Self {
            connections: RwLock::new(connections),
        }
    }
}

fn generate_id() -> String {
    format!("conn-{}", Uuid::new_v4().simple())
}

impl ConnectionStore for InMemoryConnectionStore {
    fn list_connections(&self) -> AppResult<Vec<ConnectionProfile>> {
        Ok(self.connections.read().clone())
    }

    fn create_connection(&self, payload: NewConnection) -> AppResult<ConnectionProfile> {
        validate_fields(&payload.name, &payload.host, &payload.username, payload.port)?;

        let connection = ConnectionProfile {
            id: generate_id(),
            name: payload.name.trim().to_string(),
            protocol: Protocol::from_label(&payload.protocol),
            host: payload.host.trim().to_string(),
            port: payload.port,
            username: payload.username.trim().to_string(),
            auth_type: AuthType::Password,
            group_id: None,
            group_name: None,
            tags: vec![],
            favorite: false,
            status: ConnectionHealth::Idle,
            last_connected_at: None,
        };

        self.connections.write().insert(0, connection.clone());
        tracing::info!("Created connection {} ({})", connection.id, connection.host);
        Ok(connection)
    }

    fn update_connection(&self, update: ConnectionUpdate) -> AppResult<ConnectionProfile> {
        validate_fields(&update.name, &update.host, &update.username, update.port)?;

        let mut connections = self.connections.write();
        let existing = connections
            .iter_mut()
            .find(|c| c.id == update.id)
            .ok_or_else(|| AppError::ProfileNotFound(update.id.clone()))?;

        existing.name = update.name.trim().to_string();
        existing.host = update.host.trim().to_string();
        existing.username = update.username.trim().to_string();
        existing.protocol = Protocol::from_label(&update.protocol);
        existing.port = update.port;

        tracing::info!("Updated connection {}", existing.id);
        Ok(existing.clone())
    }

    fn delete_connection(&self, id: &str) -> AppResult<()> {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        if connections.len() == before {
            return Err(AppError::ProfileNotFound(id.to_string()));
        }
        tracing::info!("Deleted connection {}", id);
        Ok(())
    }

    fn mark_connected(&self, id: &str, at: DateTime<Utc>) -> AppResult<()> {
        let mut connections = self.connections.write();
        let existing = connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| AppError::ProfileNotFound(id.to_string()))?;
        existing.status = ConnectionHealth::Connected;
        existing.last_connected_at = Some(at);
        Ok(())
    }
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

fn default_connections() -> Vec<ConnectionProfile> {
    vec![
        ConnectionProfile {
            id: "conn-prod-api".into(),
            name: "Prod API".into(),
            protocol: Protocol::Ssh,
            host: "10.21.20.8".into(),
            port: 22,
            username: "deploy".into(),
            auth_type: AuthType::PrivateKey,
            group_id: Some("grp-production".into()),
            group_name: Some("Production".into()),
            tags: vec!["critical".into(), "zero-downtime".into()],
            favorite: true,
            status: ConnectionHealth::Healthy,
            last_connected_at: timestamp(1_762_762_353),
        },
        ConnectionProfile {
            id: "conn-payments-edge".into(),
            name: "Payments Edge".into(),
            protocol: Protocol::Ssh,
            host: "10.21.32.4".into(),
            port: 22,
            username: "infra".into(),
            auth_type: AuthType::PrivateKey,
            group_id: Some("grp-production".into()),
            group_name: Some("Production".into()),
            tags: vec!["payments".into()],
            favorite: false,
            status: ConnectionHealth::Deploying,
            last_connected_at: None,
        },
        ConnectionProfile {
            id: "conn-analytics".into(),
            name: "Analytics".into(),
            protocol: Protocol::Ssh,
            host: "10.21.44.12".into(),
            port: 22,
            username: "analytics".into(),
            auth_type: AuthType::Password,
            group_id: Some("grp-staging".into()),
            group_name: Some("Staging".into()),
            tags: vec!["etl".into()],
            favorite: false,
            status: ConnectionHealth::Idle,
            last_connected_at: timestamp(1_763_159_469),
        },
        ConnectionProfile {
            id: "conn-qa-gateway".into(),
            name: "QA Gateway".into(),
            protocol: Protocol::Ssh,
            host: "10.21.77.3".into(),
            port: 22,
            username: "qa".into(),
            auth_type: AuthType::Password,
            group_id: Some("grp-qa".into()),
            group_name: Some("QA".into()),
            tags: vec![],
            favorite: false,
            status: ConnectionHealth::Connected,
            last_connected_at: timestamp(1_763_190_344),
        },
    ]
}
