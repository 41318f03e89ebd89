//! SurrealDB-backed store
//!
//! Each record is written under its typed id key with the domain value nested
//! in a `record` field, so the domain `id` never collides with the record id.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use surrealdb::Surreal;
use surrealdb::engine::any::{self, Any};

use super::{ClientStore, ConnectionStore, ConversationStore};
use crate::client::Client;
use crate::config::DatabaseConfig;
use crate::connection::Connection;
use crate::conversation::{Conversation, StoredMessage};
use crate::id::{ClientId, ConnectionId, ConversationId, UserId};
use crate::{CoreError, Result};

const CLIENT_TABLE: &str = "client";
const CONNECTION_TABLE: &str = "connection";
const CONVERSATION_TABLE: &str = "conversation";
const MESSAGE_TABLE: &str = "message";

#[derive(Debug, Serialize, Deserialize)]
struct Row<T> {
    record: T,
}

#[derive(Clone)]
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl std::fmt::Debug for SurrealStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealStore").finish_non_exhaustive()
    }
}

impl SurrealStore {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Connect using the configured endpoint and select namespace/database
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        tracing::info!("Connecting to database at: {}", config.url);
        let db = any::connect(config.url.as_str())
            .await
            .map_err(|e| CoreError::database("connect", "", e))?;
        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| CoreError::database("use_ns/use_db", "", e))?;
        Ok(Self::new(db))
    }

    /// Embedded in-memory instance
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DatabaseConfig::default()).await
    }

    async fn get<T>(&self, table: &str, key: String) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let row: Option<Row<T>> = self
            .db
            .select((table, key))
            .await
            .map_err(|e| CoreError::database("select", table, e))?;
        Ok(row.map(|r| r.record))
    }

    async fn put<T>(&self, table: &str, key: String, value: &T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let _: Option<Row<T>> = self
            .db
            .upsert((table, key))
            .content(Row {
                record: value.clone(),
            })
            .await
            .map_err(|e| CoreError::database("upsert", table, e))?;
        Ok(())
    }

    async fn remove<T>(&self, table: &str, key: String) -> Result<bool>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let removed: Option<Row<T>> = self
            .db
            .delete((table, key))
            .await
            .map_err(|e| CoreError::database("delete", table, e))?;
        Ok(removed.is_some())
    }

    async fn query_where<T>(&self, table: &str, field: &str, value: String) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let query = format!("SELECT * FROM {} WHERE record.{} = $value", table, field);
        let mut response = self
            .db
            .query(query.as_str())
            .bind(("value", value))
            .await
            .map_err(|e| CoreError::database(query.as_str(), table, e))?;

        let rows: Vec<Row<T>> = response
            .take(0)
            .map_err(|e| CoreError::database(query.as_str(), table, e))?;
        Ok(rows.into_iter().map(|r| r.record).collect())
    }
}

#[async_trait]
impl ClientStore for SurrealStore {
    async fn get_client(&self, id: &ClientId) -> Result<Option<Client>> {
        self.get(CLIENT_TABLE, id.to_record_key()).await
    }

    async fn list_clients(&self, owner_id: &UserId) -> Result<Vec<Client>> {
        self.query_where(CLIENT_TABLE, "owner_id", owner_id.to_string())
            .await
    }

    async fn save_client(&self, client: &Client) -> Result<()> {
        self.put(CLIENT_TABLE, client.id.to_record_key(), client)
            .await
    }
}

#[async_trait]
impl ConnectionStore for SurrealStore {
    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>> {
        self.get(CONNECTION_TABLE, id.to_record_key()).await
    }

    async fn list_client_connections(&self, client_id: &ClientId) -> Result<Vec<Connection>> {
        self.query_where(CONNECTION_TABLE, "client_id", client_id.to_string())
            .await
    }

    async fn list_user_connections(&self, owner_id: &UserId) -> Result<Vec<Connection>> {
        self.query_where(CONNECTION_TABLE, "owner_id", owner_id.to_string())
            .await
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        let siblings = self.list_client_connections(&connection.client_id).await?;
        for sibling in siblings
            .iter()
            .filter(|c| c.platform == connection.platform && c.id != connection.id)
        {
            tracing::debug!(
                "Replacing connection {} for {} on client {}",
                sibling.id,
                sibling.platform,
                sibling.client_id
            );
            self.remove::<Connection>(CONNECTION_TABLE, sibling.id.to_record_key())
                .await?;
        }

        self.put(CONNECTION_TABLE, connection.id.to_record_key(), connection)
            .await
    }

    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool> {
        self.remove::<Connection>(CONNECTION_TABLE, id.to_record_key())
            .await
    }
}

#[async_trait]
impl ConversationStore for SurrealStore {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        self.get(CONVERSATION_TABLE, id.to_record_key()).await
    }

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.put(
            CONVERSATION_TABLE,
            conversation.id.to_record_key(),
            conversation,
        )
        .await
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<Conversation> {
        let mut conversation = self
            .get_conversation(&message.conversation_id)
            .await?
            .ok_or_else(|| CoreError::not_found("conversation", message.conversation_id))?;

        self.put(MESSAGE_TABLE, message.id.to_record_key(), message)
            .await?;

        conversation.message_count += 1;
        conversation.updated_at = Utc::now();
        self.create_conversation(&conversation).await?;
        Ok(conversation)
    }

    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<StoredMessage>> {
        let mut messages: Vec<StoredMessage> = self
            .query_where(MESSAGE_TABLE, "conversation_id", conversation_id.to_string())
            .await?;
        // message ids are random, so order by timestamp
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn list_conversations(
        &self,
        owner_id: &UserId,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = self
            .query_where(CONVERSATION_TABLE, "owner_id", owner_id.to_string())
            .await?;
        if let Some(client_id) = client_id {
            conversations.retain(|c| c.client_id.as_ref() == Some(client_id));
        }
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }
}
