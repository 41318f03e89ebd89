//! Persistence collaborators
//!
//! The core only needs find/create/update calls against clients, connections
//! and conversations. Schema and indices belong to the backend.

use async_trait::async_trait;

use crate::Result;
use crate::client::Client;
use crate::connection::Connection;
use crate::conversation::{Conversation, StoredMessage};
use crate::id::{ClientId, ConnectionId, ConversationId, UserId};

pub mod memory;
pub mod surreal;

pub use memory::MemoryStore;
pub use surreal::SurrealStore;

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get_client(&self, id: &ClientId) -> Result<Option<Client>>;

    async fn list_clients(&self, owner_id: &UserId) -> Result<Vec<Client>>;

    async fn save_client(&self, client: &Client) -> Result<()>;
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn get_connection(&self, id: &ConnectionId) -> Result<Option<Connection>>;

    async fn list_client_connections(&self, client_id: &ClientId) -> Result<Vec<Connection>>;

    async fn list_user_connections(&self, owner_id: &UserId) -> Result<Vec<Connection>>;

    /// Write a connection by id, removing any other connection stored for the
    /// same (client, platform) pair.
    async fn upsert_connection(&self, connection: &Connection) -> Result<()>;

    /// Returns whether a record was removed
    async fn delete_connection(&self, id: &ConnectionId) -> Result<bool>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>>;

    async fn create_conversation(&self, conversation: &Conversation) -> Result<()>;

    /// Append a message and bump the owning conversation's count
    async fn append_message(&self, message: &StoredMessage) -> Result<Conversation>;

    /// Messages in insertion order
    async fn list_messages(&self, conversation_id: &ConversationId) -> Result<Vec<StoredMessage>>;

    async fn list_conversations(
        &self,
        owner_id: &UserId,
        client_id: Option<&ClientId>,
    ) -> Result<Vec<Conversation>>;
}

/// Everything the core reads and writes
pub trait Store: ClientStore + ConnectionStore + ConversationStore + std::fmt::Debug {}

impl<T> Store for T where T: ClientStore + ConnectionStore + ConversationStore + std::fmt::Debug {}
