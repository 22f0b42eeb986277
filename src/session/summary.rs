//! Session list shown in the sidebar

use super::state::{ConnectionState, SessionView};
use crate::connections::ConnectionProfile;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub connection_id: String,
    pub title: String,
    pub latency_ms: u64,
    pub status_label: String,
    pub updated_at: String,
}

pub fn status_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Idle => "Idle",
        ConnectionState::AwaitingSecret => "Awaiting password",
        ConnectionState::Connecting => "Connecting",
        ConnectionState::Active => "Live",
        ConnectionState::Failed => "Failed",
        ConnectionState::Closed => "Closed",
    }
}

fn placeholder_id(connection_id: &str) -> String {
    format!("session-{}", connection_id.trim_start_matches("conn-"))
}

/// The attempt the orchestrator is working on comes first, followed by every
/// other connection that has been used, most recent first.
pub fn summarize(view: &SessionView, connections: &[ConnectionProfile]) -> Vec<SessionSummary> {
    let mut summaries = Vec::new();

    let current = view
        .connection_id
        .as_deref()
        .and_then(|id| connections.iter().find(|c| c.id == id));
    if let Some(connection) = current {
        summaries.push(SessionSummary {
            id: view
                .session_id
                .clone()
                .unwrap_or_else(|| placeholder_id(&connection.id)),
            connection_id: connection.id.clone(),
            title: connection.name.clone(),
            latency_ms: view.latency_ms.unwrap_or(0),
            status_label: status_label(view.state).to_string(),
            updated_at: view
                .updated_at
                .or(connection.last_connected_at)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
        });
    }

    let mut history: Vec<&ConnectionProfile> = connections
        .iter()
        .filter(|c| c.last_connected_at.is_some())
        .filter(|c| current.map_or(true, |cur| cur.id != c.id))
        .collect();
    history.sort_by(|a, b| b.last_connected_at.cmp(&a.last_connected_at));

    summaries.extend(history.into_iter().map(|connection| SessionSummary {
        id: placeholder_id(&connection.id),
        connection_id: connection.id.clone(),
        title: connection.name.clone(),
        latency_ms: 0,
        status_label: status_label(ConnectionState::Idle).to_string(),
        updated_at: connection
            .last_connected_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
    }));

    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{ConnectionStore, InMemoryConnectionStore};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_live_session_listed_first() {
        let connections = InMemoryConnectionStore::with_fixtures().list_connections().unwrap();
        let view = SessionView {
            state: ConnectionState::Active,
            session_id: Some("session-abc".into()),
            connection_id: Some("conn-qa-gateway".into()),
            latency_ms: Some(37),
            updated_at: Some(Utc.with_ymd_and_hms(2025, 11, 15, 14, 0, 0).unwrap()),
            ..SessionView::default()
        };

        let summaries = summarize(&view, &connections);
        let first = &summaries[0];
        assert_eq!(first.id, "session-abc");
        assert_eq!(first.connection_id, "conn-qa-gateway");
        assert_eq!(first.status_label, "Live");
        assert_eq!(first.latency_ms, 37);
        assert_eq!(first.updated_at, "2025-11-15T14:00:00+00:00");
        assert_eq!(
            summaries.iter().filter(|s| s.connection_id == "conn-qa-gateway").count(),
            1
        );

        let wire = serde_json::to_value(first).unwrap();
        assert_eq!(wire["statusLabel"], "Live");
        assert_eq!(wire["latencyMs"], 37);
    }

    #[test]
    fn test_history_sorted_most_recent_first() {
        let connections = InMemoryConnectionStore::with_fixtures().list_connections().unwrap();
        let summaries = summarize(&SessionView::default(), &connections);

        assert!(summaries.iter().all(|s| s.status_label == "Idle"));
        let stamps: Vec<&str> = summaries.iter().map(|s| s.updated_at.as_str()).collect();
        let mut sorted = stamps.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(stamps, sorted);
        assert_eq!(
            summaries.len(),
            connections.iter().filter(|c| c.last_connected_at.is_some()).count()
        );
    }

    #[test]
    fn test_pending_attempt_gets_placeholder_id() {
        let connections = InMemoryConnectionStore::with_fixtures().list_connections().unwrap();
        let view = SessionView {
            state: ConnectionState::AwaitingSecret,
            connection_id: Some("conn-analytics".into()),
            ..SessionView::default()
        };
        let summaries = summarize(&view, &connections);
        assert_eq!(summaries[0].id, "session-analytics");
        assert_eq!(summaries[0].status_label, "Awaiting password");
    }
}
