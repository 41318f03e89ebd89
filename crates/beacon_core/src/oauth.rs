//! OAuth support for connecting marketing platforms
//!
//! The authorization-code flow with PKCE is used for every platform. The
//! `state` parameter carries an [`AuthState`] so the callback knows which
//! client and platform it completes; the PKCE verifier never leaves the
//! process and is looked up by the state's nonce.

pub mod flow;

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::connection::Platform;
use crate::id::{ClientId, UserId};
use crate::{CoreError, Result};

pub use flow::{HttpTokenClient, OAuthConfig};

/// Minutes a started authorization stays redeemable
const PKCE_VALIDITY_MINUTES: i64 = 15;

/// PKCE material for one authorization attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub created_at: DateTime<Utc>,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let verifier = flow::generate_code_verifier();
        let challenge = flow::generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
            created_at: Utc::now(),
        }
    }

    /// Check if this challenge is still valid (15 minute timeout)
    pub fn is_valid(&self) -> bool {
        let elapsed = Utc::now().signed_duration_since(self.created_at);
        elapsed.num_minutes() < PKCE_VALIDITY_MINUTES
    }
}

/// What the callback needs to finish a connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub client_id: ClientId,
    pub platform: Platform,
    /// Relative path the browser returns to once connected
    pub return_to: String,
    pub nonce: String,
}

impl AuthState {
    pub fn new(client_id: ClientId, platform: Platform, return_to: impl Into<String>) -> Self {
        Self {
            client_id,
            platform,
            return_to: return_to.into(),
            nonce: flow::generate_nonce(),
        }
    }

    /// Encode as the opaque `state` query parameter
    pub fn encode(&self) -> Result<String> {
        let json =
            serde_json::to_vec(self).map_err(|e| CoreError::serialization("AuthState", e))?;
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(state: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(state)
            .map_err(|_| CoreError::validation("state", "OAuth state is not valid base64url"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| CoreError::validation("state", "OAuth state could not be decoded"))
    }
}

/// A started authorization waiting for its callback
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub owner_id: UserId,
    pub state: AuthState,
    pub pkce: PkceChallenge,
}

/// In-memory registry of started authorizations, keyed by nonce
#[derive(Debug, Default)]
pub struct PendingAuthorizations {
    pending: Mutex<HashMap<String, PendingAuthorization>>,
}

impl PendingAuthorizations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pending: PendingAuthorization) {
        let mut map = self.pending.lock();
        map.retain(|_, p| p.pkce.is_valid());
        map.insert(pending.state.nonce.clone(), pending);
    }

    /// Remove and return the authorization for `state`. Each nonce redeems once.
    pub fn take(&self, state: &AuthState) -> Result<PendingAuthorization> {
        let pending = self.pending.lock().remove(&state.nonce).ok_or_else(|| {
            CoreError::validation("state", "Unknown or already used authorization state")
        })?;

        if !pending.pkce.is_valid() {
            return Err(CoreError::validation(
                "state",
                "Authorization expired. Please start the connection again.",
            ));
        }

        if pending.state != *state {
            return Err(CoreError::validation(
                "state",
                "Authorization state does not match the started request",
            ));
        }

        Ok(pending)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Token request types for OAuth flows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "grant_type")]
pub enum TokenRequest {
    #[serde(rename = "authorization_code")]
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: String,
    },
    #[serde(rename = "refresh_token")]
    RefreshToken { refresh_token: String },
    /// Meta's long-lived token exchange, which stands in for refresh
    #[serde(rename = "fb_exchange_token")]
    ExchangeToken { fb_exchange_token: String },
}

/// Token response from OAuth provider
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Seconds; some platforms omit it for long-lived tokens
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl TokenResponse {
    /// Absolute expiry, using `fallback` when the platform gave no lifetime
    pub fn expires_at(&self, now: DateTime<Utc>, fallback: Duration) -> DateTime<Utc> {
        match self.expires_in {
            Some(secs) if secs > 0 => now + Duration::seconds(secs),
            _ => now + fallback,
        }
    }
}

/// Token endpoint operations, one implementation per deployment
#[async_trait]
pub trait TokenClient: Send + Sync + std::fmt::Debug {
    /// Build the browser redirect for a started authorization
    fn authorization_url(&self, platform: Platform, state: &str, pkce: &PkceChallenge)
    -> Result<String>;

    async fn exchange_code(
        &self,
        platform: Platform,
        code: &str,
        pkce: &PkceChallenge,
    ) -> Result<TokenResponse>;

    /// `credential` is the refresh token, or the access token for platforms
    /// that renew by exchange
    async fn refresh(&self, platform: Platform, credential: &str) -> Result<TokenResponse>;

    /// Best-effort revocation of a credential at the platform
    async fn revoke(&self, platform: Platform, token: &str) -> Result<()>;

    /// Lifetime assumed when a token response carries no `expires_in`
    fn default_lifetime(&self, platform: Platform) -> Duration {
        match platform {
            Platform::MetaAds => Duration::days(60),
            Platform::GoogleAnalytics | Platform::GoogleAds => Duration::hours(1),
        }
    }
}

/// Credential used to renew a connection, if the platform allows renewal
pub fn renewal_credential(connection: &crate::connection::Connection) -> Option<&str> {
    match connection.platform {
        Platform::MetaAds => connection
            .refresh_token
            .as_deref()
            .or(Some(connection.access_token.as_str())),
        Platform::GoogleAnalytics | Platform::GoogleAds => connection.refresh_token.as_deref(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn started(platform: Platform) -> PendingAuthorization {
        PendingAuthorization {
            owner_id: UserId::generate(),
            state: AuthState::new(ClientId::generate(), platform, "/clients"),
            pkce: PkceChallenge::generate(),
        }
    }

    #[test]
    fn test_auth_state_roundtrip() {
        let state = AuthState::new(ClientId::generate(), Platform::GoogleAds, "/clients/1");
        let encoded = state.encode().unwrap();
        assert!(!encoded.contains('='));
        assert_eq!(AuthState::decode(&encoded).unwrap(), state);
    }

    #[test]
    fn test_auth_state_garbage_is_validation_error() {
        let err = AuthState::decode("not json at all!").unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure { .. }));
    }

    #[test]
    fn test_pending_nonce_redeems_once() {
        let registry = PendingAuthorizations::new();
        let pending = started(Platform::MetaAds);
        let state = pending.state.clone();
        registry.insert(pending);

        assert!(registry.take(&state).is_ok());
        assert!(registry.take(&state).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pending_rejects_expired_and_tampered() {
        let registry = PendingAuthorizations::new();

        let mut stale = started(Platform::GoogleAnalytics);
        stale.pkce.created_at = Utc::now() - Duration::minutes(20);
        let stale_state = stale.state.clone();
        registry.pending.lock().insert(stale_state.nonce.clone(), stale);
        assert!(registry.take(&stale_state).is_err());

        let pending = started(Platform::GoogleAnalytics);
        let mut tampered = pending.state.clone();
        tampered.platform = Platform::MetaAds;
        registry.insert(pending);
        assert!(registry.take(&tampered).is_err());
    }

    #[test]
    fn test_token_response_expiry_fallback() {
        let now = Utc::now();
        let with: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":3599,"token_type":"Bearer"}"#)
                .unwrap();
        assert_eq!(with.expires_at(now, Duration::days(60)), now + Duration::seconds(3599));

        let without: TokenResponse = serde_json::from_str(r#"{"access_token":"a"}"#).unwrap();
        assert_eq!(without.expires_at(now, Duration::days(60)), now + Duration::days(60));
    }
}
