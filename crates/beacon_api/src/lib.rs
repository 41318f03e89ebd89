//! Beacon API types and definitions
//!
//! This crate defines the request/response types for the Beacon HTTP API,
//! shared between the server and any client that talks to it.

pub mod error;
pub mod requests;
pub mod responses;

pub use error::ApiError;

// Re-export common types from beacon-core
pub use beacon_core::aggregation::{AggregatedMetrics, DashboardStats};
pub use beacon_core::completion::StreamFrame;
pub use beacon_core::connection::{ConnectionStatus, Platform, PlatformFamily};
pub use beacon_core::id::{ClientId, ConnectionId, ConversationId, UserId};

use jsonwebtoken::{Algorithm, Validation};
use serde::{Deserialize, Serialize};

/// API version constant
pub const API_VERSION: &str = "v1";

/// Claims carried by a bearer access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Acting user
    pub sub: UserId,
    pub iat: i64,
    pub exp: i64,
    pub jti: uuid::Uuid,
}

impl AccessTokenClaims {
    pub fn new(user_id: UserId, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user_id,
            iat: now,
            exp: now + ttl_seconds,
            jti: uuid::Uuid::new_v4(),
        }
    }

    /// Tokens are HS256 signed and must carry `exp`
    pub fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }
}
