//! Dashboard view: metrics, connection health, recent activity and usage.
//!
//! Each section is gathered on its own and a failing section is replaced by
//! its empty value, so one broken query never blanks the whole page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AggregatedMetrics, AggregationEngine, MetricsQuery};
use crate::client::Client;
use crate::connection::{ConnectionHealth, ConnectionStatus, HealthStatus, Platform};
use crate::id::{ClientId, ConnectionId, UserId};
use crate::{Result, log_contained};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub connection_id: ConnectionId,
    pub client_id: ClientId,
    pub client_name: String,
    pub platform: Platform,
    pub status: ConnectionStatus,
    pub health: ConnectionHealth,
    /// Failure from this dashboard's metrics fetch, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ClientCreated,
    PlatformConnected,
    Conversation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub kind: ActivityKind,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub clients: usize,
    pub connections: usize,
    pub healthy_connections: usize,
    pub expiring_connections: usize,
    pub expired_connections: usize,
    pub conversations: usize,
    pub messages: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub metrics: AggregatedMetrics,
    pub health: Vec<HealthEntry>,
    pub recent_activity: Vec<ActivityItem>,
    pub usage: UsageStats,
    /// Sections that could not be loaded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<String>,
}

/// Newest first, capped at `limit`
pub fn interleave_activity(mut items: Vec<ActivityItem>, limit: usize) -> Vec<ActivityItem> {
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items.truncate(limit);
    items
}

fn client_name(clients: &[Client], id: &ClientId) -> String {
    clients
        .iter()
        .find(|c| &c.id == id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "Unknown client".to_string())
}

impl AggregationEngine {
    /// Everything the dashboard shows for one user. Never fails as a whole.
    #[tracing::instrument(skip(self, query), fields(user = %user_id))]
    pub async fn dashboard(&self, user_id: &UserId, query: &MetricsQuery) -> DashboardStats {
        let (metrics, health, activity, usage) = tokio::join!(
            self.aggregate_user(user_id, query),
            self.health_list(user_id),
            self.recent_activity(user_id),
            self.usage(user_id),
        );

        let mut stats = DashboardStats::default();
        let mut unavailable = Vec::new();
        let mut section = |name: &str, err: crate::CoreError| {
            log_contained!(format!("dashboard {} section", name), err);
            unavailable.push(name.to_string());
        };

        match metrics {
            Ok(m) => stats.metrics = m,
            Err(e) => section("metrics", e),
        }
        match health {
            Ok(h) => stats.health = h,
            Err(e) => section("health", e),
        }
        match activity {
            Ok(a) => stats.recent_activity = a,
            Err(e) => section("activity", e),
        }
        match usage {
            Ok(u) => stats.usage = u,
            Err(e) => section("usage", e),
        }
        stats.unavailable = unavailable;

        for failed in stats.metrics.failed_connections() {
            if let Some(entry) = stats
                .health
                .iter_mut()
                .find(|h| h.connection_id == failed.connection_id)
            {
                entry.fetch_error = failed.error.clone();
            }
        }
        stats
    }

    /// Every connection with its computed health, soonest expiry first
    pub async fn health_list(&self, user_id: &UserId) -> Result<Vec<HealthEntry>> {
        let store = self.manager.store();
        let clients = store.list_clients(user_id).await?;
        let mut connections = store.list_user_connections(user_id).await?;
        connections.sort_by_key(|c| c.expires_at);

        Ok(connections
            .iter()
            .map(|c| HealthEntry {
                connection_id: c.id,
                client_id: c.client_id,
                client_name: client_name(&clients, &c.client_id),
                platform: c.platform,
                status: c.effective_status(),
                health: self.manager.health(c),
                fetch_error: None,
            })
            .collect())
    }

    /// Most recent clients, connections and conversations, interleaved
    pub async fn recent_activity(&self, user_id: &UserId) -> Result<Vec<ActivityItem>> {
        let store = self.manager.store();
        let clients = store.list_clients(user_id).await?;
        let connections = store.list_user_connections(user_id).await?;
        let conversations = store.list_conversations(user_id, None).await?;

        let items = clients
            .iter()
            .map(|c| ActivityItem {
                kind: ActivityKind::ClientCreated,
                id: c.id.to_string(),
                title: c.name.clone(),
                client_id: Some(c.id),
                timestamp: c.created_at,
            })
            .chain(connections.iter().map(|c| ActivityItem {
                kind: ActivityKind::PlatformConnected,
                id: c.id.to_string(),
                title: format!(
                    "{} connected for {}",
                    c.platform.display_name(),
                    client_name(&clients, &c.client_id)
                ),
                client_id: Some(c.client_id),
                timestamp: c.created_at,
            }))
            .chain(conversations.iter().map(|c| ActivityItem {
                kind: ActivityKind::Conversation,
                id: c.id.to_string(),
                title: c.title.clone(),
                client_id: c.client_id,
                timestamp: c.updated_at,
            }))
            .collect();

        Ok(interleave_activity(items, self.activity_limit()))
    }

    pub async fn usage(&self, user_id: &UserId) -> Result<UsageStats> {
        let store = self.manager.store();
        let clients = store.list_clients(user_id).await?;
        let connections = store.list_user_connections(user_id).await?;
        let conversations = store.list_conversations(user_id, None).await?;

        let mut usage = UsageStats {
            clients: clients.len(),
            connections: connections.len(),
            conversations: conversations.len(),
            messages: conversations.iter().map(|c| c.message_count).sum(),
            ..Default::default()
        };
        for connection in &connections {
            match self.manager.health(connection).status {
                HealthStatus::Healthy => usage.healthy_connections += 1,
                HealthStatus::Warning => usage.expiring_connections += 1,
                HealthStatus::Expired => usage.expired_connections += 1,
            }
        }
        Ok(usage)
    }
}
