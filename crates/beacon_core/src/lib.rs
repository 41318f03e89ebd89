//! Beacon Core - connection lifecycle, aggregation and chat pipeline
//!
//! This crate holds the domain logic behind Beacon: OAuth connections to
//! marketing platforms, the fetch adapters that read them, concurrent
//! aggregation across every connection a client has, and the completion
//! pipeline that answers questions about that data.

pub mod aggregation;
pub mod client;
pub mod completion;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod model;
pub mod oauth;
pub mod platform;
pub mod rate_limit;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_utils;

// Macros are automatically available at crate root due to #[macro_export]

pub use aggregation::{AggregatedMetrics, AggregationEngine, DashboardStats, MetricsQuery};
pub use client::Client;
pub use completion::{CompletionPipeline, CompletionRequest, StreamFrame};
pub use config::BeaconConfig;
pub use connection::{Connection, ConnectionHealth, ConnectionStatus, HealthStatus, Platform};
pub use error::{CoreError, Result};
pub use id::{ClientId, ConnectionId, ConversationId, Id, IdType, MessageId, UserId};
pub use lifecycle::ConnectionManager;
pub use model::{GenAiProvider, MockModelProvider, ModelProvider};
pub use oauth::{HttpTokenClient, TokenClient};
pub use platform::{PlatformAdapter, PlatformRegistry};
pub use rate_limit::RateLimiter;
pub use store::{MemoryStore, Store, SurrealStore};
