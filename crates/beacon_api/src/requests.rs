//! API request types

use beacon_core::aggregation::MetricsQuery;
use beacon_core::completion::CompletionRequest;
use beacon_core::connection::{Platform, PlatformFamily};
use beacon_core::conversation::ChatTurn;
use beacon_core::id::{ClientId, ConversationId};
use beacon_core::platform::DateRange;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ApiError;

/// Start an OAuth connection for a client
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub client_id: ClientId,
    pub platform: Platform,
    /// Relative path to land on after the callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

/// Pick which property, customer or ad account a connection reads
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectResourceRequest {
    pub resource_id: String,
}

/// Query string for metrics and dashboard reads
///
/// `start`/`end` are `YYYY-MM-DD` and must be given together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<PlatformFamily>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

impl MetricsParams {
    pub fn into_query(self) -> Result<MetricsQuery, ApiError> {
        let range = match (self.start.as_deref(), self.end.as_deref()) {
            (None, None) => None,
            (Some(start), Some(end)) => Some(DateRange::new(
                NaiveDate::parse_from_str(start, "%Y-%m-%d")?,
                NaiveDate::parse_from_str(end, "%Y-%m-%d")?,
            )?),
            _ => {
                return Err(ApiError::validation(
                    "'start' and 'end' must be given together",
                ));
            }
        };

        Ok(MetricsQuery {
            range,
            family: self.family,
            platform: self.platform,
            selector: self.selector.filter(|s| !s.is_empty()),
        })
    }
}

/// Filter for conversation history
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

/// Body of a chat call, streamed or not
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequestBody {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

impl From<ChatRequestBody> for CompletionRequest {
    fn from(body: ChatRequestBody) -> Self {
        CompletionRequest {
            messages: body.messages,
            client_id: body.client_id,
            conversation_id: body.conversation_id,
        }
    }
}
