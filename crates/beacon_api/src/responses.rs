//! API response types

use beacon_core::completion::CompletionOutcome;
use beacon_core::conversation::Conversation;
use beacon_core::id::{ClientId, ConversationId};
use beacon_core::lifecycle::{ConnectionSummary, DisconnectOutcome};
use beacon_core::platform::Resource;
use serde::{Deserialize, Serialize};

/// Where to send the user to grant access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectResponse {
    pub success: bool,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<DisconnectOutcome> for DisconnectResponse {
    fn from(outcome: DisconnectOutcome) -> Self {
        Self {
            success: outcome.success,
            revoked: outcome.revoked,
            error: outcome.error,
        }
    }
}

/// A client's connections with derived health
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionListResponse {
    pub client_id: ClientId,
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListResponse {
    pub resources: Vec<Resource>,
    /// Currently selected resource id, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

/// Non-streamed chat answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl From<CompletionOutcome> for ChatResponse {
    fn from(outcome: CompletionOutcome) -> Self {
        Self {
            content: outcome.content,
            conversation_id: outcome.conversation_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<Conversation>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub database_status: ComponentStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connect_response_key() {
        let json = serde_json::to_value(ConnectResponse {
            auth_url: "https://auth.example".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"authUrl": "https://auth.example"}));
    }

    #[test]
    fn test_chat_response_key() {
        let id = ConversationId::generate();
        let json = serde_json::to_value(ChatResponse::from(CompletionOutcome {
            content: "Sessions are up 12%.".to_string(),
            conversation_id: Some(id),
        }))
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"content": "Sessions are up 12%.", "conversationId": id.to_string()})
        );
    }

    #[test]
    fn test_disconnect_response_omits_empty_error() {
        let json = serde_json::to_value(DisconnectResponse::from(DisconnectOutcome {
            success: true,
            revoked: false,
            error: None,
        }))
        .unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "revoked": false}));
    }
}
