//! In-process store used by tests and the `memory` database profile

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{ClientStore, ConnectionStore, ConversationStore};
use crate::client::Client;
use crate::connection::Connection;
use crate::conversation::{Conversation, StoredMessage};
use crate::id::{ClientId, ConnectionId, ConversationId, UserId};
use crate::{CoreError, Result};

#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: DashMap<ClientId, Client>,
    connections: DashMap<ConnectionId, Connection>,
    conversations: DashMap<ConversationId, Conversation>,
    messages: DashMap<ConversationId, Vec<StoredMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn get_client(&self, id: &ClientId) -> Result<Option<Client>> {
        Ok(self.clients.get(id).map(|c| c.clone()))
    }

    async fn list_clients(&self, owner_id: &UserId) -> Result<Vec<Client>> {
        Ok(self
            .clients
            .iter()
            .filter(|c| &c.owner_id == owner_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn save_client(&self, client: &Client) -> Result<()> {
        self.clients.insert(client.id, client.clone());
        Ok(())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        Ok(self.connections.get(id).map(|c| c.clone()))
    }

    async fn list_client_connections(&self, client_id: &ClientId) -> Result<Vec<Connection>> {
        Ok(self
            .connections
            .iter()
            .filter(|c| &c.client_id == client_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn list_user_connections(&self, owner_id: &UserId) -> Result<Vec<Connection>> {
        Ok(self
            .connections
            .iter()
            .filter(|c| &c.owner_id == owner_id)
            .map(|c| c.clone())
            .collect())
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        self.connections.retain(|id, existing| {
            id == &connection.id
                || existing.client_id != connection.client_id
                || existing.platform != connection.platform
        });
        self.connections.insert(connection.id, connection.clone());
        Ok(())
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool> {
        Ok(self.connections.remove(id).is_some())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        Ok(self.conversations.get(id).map(|c| c.clone()))
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.conversations
            .insert(conversation.id, conversation.clone());
        Ok(())
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<Conversation> {
        let mut conversation = self
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| CoreError::not_found("conversation", message.conversation_id))?;

        self.messages
            .entry(message.conversation_id)
            .or_default()
            .push(message.clone());

        conversation.message_count += 1;
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .get(conversation_id)
            .map(|m| m.clone())
            .unwrap_or_default())
    }

    async fn list_conversations(
        &self,
        owner_id: &UserId,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| &c.owner_id == owner_id)
            .filter(|c| client_id.is_none() || c.client_id.as_ref() == client_id)
            .map(|c| c.clone())
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}
