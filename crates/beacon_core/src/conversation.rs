//! Persisted chat history
//!
//! A [`Conversation`] belongs to exactly one user and, optionally, the client
//! the chat was about. Messages are stored separately and ordered by time.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::id::{ClientId, ConversationId, MessageId, UserId};

const TITLE_MAX_CHARS: usize = 60;
const DEFAULT_TITLE: &str = "New conversation";

/// Chat roles that are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One turn as sent to the model provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub owner_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
    pub title: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation, titled after its first user message
    pub fn start(owner_id: UserId, client_id: Option<ClientId>, first_message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::generate(),
            owner_id,
            client_id,
            title: derive_title(first_message),
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.owner_id == user_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn new(conversation_id: ConversationId, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            conversation_id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn as_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Conversation with its ordered messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<StoredMessage>,
}

/// Title from the first line of the opening message, cut at a char boundary
pub fn derive_title(first_message: &str) -> String {
    let line = first_message.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(line) = line else {
        return DEFAULT_TITLE.to_string();
    };

    if line.chars().count() <= TITLE_MAX_CHARS {
        return line.to_string();
    }

    let truncated: String = line.chars().take(TITLE_MAX_CHARS).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_short_message_kept() {
        assert_eq!(derive_title("How did ads do?"), "How did ads do?");
    }

    #[test]
    fn test_title_truncated_on_char_boundary() {
        let long = "é".repeat(80);
        let title = derive_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_title_uses_first_non_empty_line() {
        assert_eq!(derive_title("\n\n  Weekly spend  \nmore"), "Weekly spend");
        assert_eq!(derive_title("   "), DEFAULT_TITLE);
    }
}
