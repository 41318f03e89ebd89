//! Connection lifecycle: connect, refresh, disconnect, health
//!
//! Operations that mutate one connection take that connection's async lock,
//! so a refresh and a disconnect on the same id run one after the other and a
//! refresh can never write back a connection that was just removed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::client::Client;
use crate::connection::{Connection, ConnectionHealth, ConnectionStatus, Platform, connection_health};
use crate::id::{ClientId, ConnectionId, UserId};
use crate::oauth::{
    AuthState, PendingAuthorization, PendingAuthorizations, PkceChallenge, TokenClient,
    renewal_credential,
};
use crate::platform::{PlatformRegistry, Resource};
use crate::store::Store;
use crate::{CoreError, Result, log_contained};

/// Authorization redirect for a started connect
#[derive(Debug, Clone)]
pub struct ConnectStart {
    pub authorization_url: String,
    pub state: AuthState,
}

/// Query parameters delivered to the OAuth callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletedConnect {
    pub connection: Connection,
    pub return_to: String,
}

/// Result of a disconnect; unknown ids are a failure value, not an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectOutcome {
    pub success: bool,
    /// Whether the platform confirmed revocation
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read model of a connection for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub client_id: ClientId,
    pub platform: Platform,
    pub status: ConnectionStatus,
    pub health: ConnectionHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug)]
pub struct ConnectionManager {
    store: Arc<dyn Store>,
    tokens: Arc<dyn TokenClient>,
    adapters: PlatformRegistry,
    pending: PendingAuthorizations,
    locks: DashMap<ConnectionId, Arc<tokio::sync::Mutex<()>>>,
    warning_days: i64,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: Arc<dyn TokenClient>,
        adapters: PlatformRegistry,
        warning_days: i64,
    ) -> Self {
        Self {
            store,
            tokens,
            adapters,
            pending: PendingAuthorizations::new(),
            locks: DashMap::new(),
            warning_days,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn adapters(&self) -> &PlatformRegistry {
        &self.adapters
    }

    fn lock_for(&self, id: &ConnectionId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(*id).or_default().clone()
    }

    /// Forget the lock for `id` unless another task is holding or waiting on
    /// it. `held` is the caller's own handle and must still be alive here.
    fn release_lock(&self, id: &ConnectionId, held: &Arc<tokio::sync::Mutex<()>>) {
        self.locks
            .remove_if(id, |_, lock| Arc::ptr_eq(lock, held) && Arc::strong_count(lock) <= 2);
    }

    /// Load a client the user owns
    pub async fn owned_client(&self, user_id: &UserId, client_id: &ClientId) -> Result<Client> {
        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| CoreError::not_found("client", client_id))?;
        if !client.is_owned_by(user_id) {
            return Err(CoreError::permission_denied(
                user_id,
                format!("client {}", client_id),
            ));
        }
        Ok(client)
    }

    async fn owned_connection(&self, user_id: &UserId, id: &ConnectionId) -> Result<Connection> {
        let connection = self
            .store
            .get_connection(id)
            .await?
            .ok_or_else(|| CoreError::not_found("connection", id))?;
        if &connection.owner_id != user_id {
            return Err(CoreError::permission_denied(
                user_id,
                format!("connection {}", id),
            ));
        }
        Ok(connection)
    }

    /// Start connecting `platform` to a client. Nothing is stored until the
    /// callback completes.
    #[tracing::instrument(skip(self), fields(user = %user_id, client = %client_id))]
    pub async fn connect(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
        platform: Platform,
        return_to: Option<String>,
    ) -> Result<ConnectStart> {
        let return_to = validate_return_to(return_to, client_id)?;
        self.owned_client(user_id, client_id).await?;

        let state = AuthState::new(*client_id, platform, return_to);
        let pkce = PkceChallenge::generate();
        let authorization_url = self
            .tokens
            .authorization_url(platform, &state.encode()?, &pkce)?;

        self.pending.insert(PendingAuthorization {
            owner_id: *user_id,
            state: state.clone(),
            pkce,
        });

        tracing::info!("Started {} authorization", platform.as_str());
        Ok(ConnectStart {
            authorization_url,
            state,
        })
    }

    /// Finish a connect from the platform's callback
    #[tracing::instrument(skip(self, params))]
    pub async fn complete_connect(&self, params: CallbackParams) -> Result<CompletedConnect> {
        let raw_state = params
            .state
            .as_deref()
            .ok_or_else(|| CoreError::validation("state", "Missing 'state' parameter"))?;
        let state = AuthState::decode(raw_state)?;
        let pending = self.pending.take(&state)?;

        if let Some(error) = params.error {
            let details = params.error_description.unwrap_or_else(|| error.clone());
            return Err(CoreError::oauth(state.platform, "authorize", details));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoreError::validation("code", "Missing 'code' parameter"))?;

        let tokens = self
            .tokens
            .exchange_code(state.platform, &code, &pending.pkce)
            .await?;
        let now = Utc::now();
        let expires_at = tokens.expires_at(now, self.tokens.default_lifetime(state.platform));

        let mut connection = Connection::new(
            state.client_id,
            pending.owner_id,
            state.platform,
            tokens.access_token,
            tokens.refresh_token,
            expires_at,
        );

        // reconnecting keeps the id so history and links stay valid
        let existing = self.store.list_client_connections(&state.client_id).await?;
        if let Some(previous) = existing.iter().find(|c| c.platform == state.platform) {
            connection.id = previous.id;
            connection.created_at = previous.created_at;
            if connection.refresh_token.is_none() {
                connection.refresh_token = previous.refresh_token.clone();
            }
        }

        self.verify_credential(&connection).await?;

        let lock = self.lock_for(&connection.id);
        let _guard = lock.lock().await;

        self.auto_select_resource(&mut connection).await;
        self.store.upsert_connection(&connection).await?;

        tracing::info!(
            connection = %connection.id,
            "Connected {} for client {}",
            state.platform.as_str(),
            state.client_id
        );

        Ok(CompletedConnect {
            connection,
            return_to: state.return_to,
        })
    }

    /// Refuse a freshly issued credential the platform already rejects.
    /// An unreachable platform does not block the connection.
    async fn verify_credential(&self, connection: &Connection) -> Result<()> {
        let probe = match self.adapters.get(connection.platform) {
            Ok(adapter) => adapter.test_connection(&connection.credential()).await,
            Err(e) => Err(e),
        };
        match probe {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoreError::auth_failure(
                connection.platform,
                "The platform rejected the new credential",
            )),
            Err(e) => {
                log_contained!("credential check after connect", e);
                Ok(())
            }
        }
    }

    /// Select the only visible resource, if there is exactly one
    async fn auto_select_resource(&self, connection: &mut Connection) {
        let resources = match self.adapters.get(connection.platform) {
            Ok(adapter) => adapter.list_resources(&connection.credential()).await,
            Err(e) => Err(e),
        };
        match resources {
            Ok(resources) if resources.len() == 1 => {
                let only = &resources[0];
                connection.set_resource(only.id.clone(), only.name.clone());
            }
            Ok(_) => {}
            Err(e) => log_contained!("resource discovery after connect", e),
        }
    }

    /// Exchange the stored renewal credential for a fresh access token
    #[tracing::instrument(skip(self), fields(user = %user_id))]
    pub async fn refresh(&self, user_id: &UserId, id: &ConnectionId) -> Result<Connection> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let connection = self.owned_connection(user_id, id).await?;
        self.refresh_locked(connection).await
    }

    async fn refresh_locked(&self, mut connection: Connection) -> Result<Connection> {
        let Some(credential) = renewal_credential(&connection).map(str::to_string) else {
            let err = CoreError::auth_failure(
                connection.platform,
                "No refresh credential stored. Reconnect to continue.",
            );
            connection.mark_error(err.to_string());
            self.store.upsert_connection(&connection).await?;
            return Err(err);
        };

        match self.tokens.refresh(connection.platform, &credential).await {
            Ok(tokens) => {
                let expires_at = tokens.expires_at(
                    Utc::now(),
                    self.tokens.default_lifetime(connection.platform),
                );
                connection.update_from_refresh(tokens.access_token, tokens.refresh_token, expires_at);
                self.store.upsert_connection(&connection).await?;
                tracing::info!(connection = %connection.id, "Refreshed credential");
                Ok(connection)
            }
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(connection = %connection.id, "Credential refresh rejected: {}", e);
                connection.mark_error(e.to_string());
                self.store.upsert_connection(&connection).await?;
                Err(e)
            }
            Err(e) => {
                // status stays as is; the credential itself was not refused
                tracing::warn!(connection = %connection.id, "Credential refresh failed: {}", e);
                Err(e)
            }
        }
    }

    /// Refresh opportunistically when the credential is about to expire.
    ///
    /// Used before fetching. A connection without a renewal credential is
    /// returned as is and the adapter call decides.
    pub async fn ensure_fresh(&self, connection: Connection) -> Result<Connection> {
        if !connection.needs_refresh() || renewal_credential(&connection).is_none() {
            return Ok(connection);
        }

        let lock = self.lock_for(&connection.id);
        let _guard = lock.lock().await;

        // reload under the lock; another task may have refreshed or removed it
        let current = self
            .store
            .get_connection(&connection.id)
            .await?
            .ok_or_else(|| CoreError::not_found("connection", connection.id))?;
        if !current.needs_refresh() {
            return Ok(current);
        }
        self.refresh_locked(current).await
    }

    /// Revoke at the platform (best effort) and delete locally
    #[tracing::instrument(skip(self), fields(user = %user_id))]
    pub async fn disconnect(&self, user_id: &UserId, id: &ConnectionId) -> Result<DisconnectOutcome> {
        let lock = self.lock_for(id);
        let guard = lock.lock().await;

        let connection = match self.owned_connection(user_id, id).await {
            Ok(connection) => connection,
            Err(CoreError::NotFound { .. }) => {
                drop(guard);
                self.release_lock(id, &lock);
                return Ok(DisconnectOutcome {
                    success: false,
                    revoked: false,
                    error: Some("Connection not found".to_string()),
                });
            }
            Err(e) => return Err(e),
        };

        let revoked = match self
            .tokens
            .revoke(connection.platform, &connection.access_token)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log_contained!("credential revocation", e);
                false
            }
        };

        let removed = self.store.delete_connection(id).await?;
        drop(guard);
        self.release_lock(id, &lock);

        tracing::info!(connection = %id, revoked, "Disconnected {}", connection.platform.as_str());
        Ok(DisconnectOutcome {
            success: removed,
            revoked,
            error: (!removed).then(|| "Connection was already removed".to_string()),
        })
    }

    /// Connections of one client with computed health
    pub async fn list_connections(
        &self,
        user_id: &UserId,
        client_id: &ClientId,
    ) -> Result<Vec<ConnectionSummary>> {
        self.owned_client(user_id, client_id).await?;
        let mut connections = self.store.list_client_connections(client_id).await?;
        connections.sort_by_key(|c| c.platform);
        Ok(connections.iter().map(|c| self.summarize(c)).collect())
    }

    /// One connection the user owns
    pub async fn connection_summary(
        &self,
        user_id: &UserId,
        id: &ConnectionId,
    ) -> Result<ConnectionSummary> {
        let connection = self.owned_connection(user_id, id).await?;
        Ok(self.summarize(&connection))
    }

    pub fn summarize(&self, connection: &Connection) -> ConnectionSummary {
        ConnectionSummary {
            id: connection.id,
            client_id: connection.client_id,
            platform: connection.platform,
            status: connection.effective_status(),
            health: self.health(connection),
            resource_id: connection.resource_id().map(str::to_string),
            resource_name: connection.resource_name().map(str::to_string),
            expires_at: connection.expires_at,
            last_synced_at: connection.last_synced_at,
            last_error: connection.last_error.clone(),
        }
    }

    /// Properties / ad accounts the connection can see
    pub async fn list_resources(&self, user_id: &UserId, id: &ConnectionId) -> Result<Vec<Resource>> {
        let connection = self.owned_connection(user_id, id).await?;
        let connection = self.ensure_fresh(connection).await?;
        let adapter = self.adapters.get(connection.platform)?;
        adapter.list_resources(&connection.credential()).await
    }

    /// Switch the connection to another property / ad account
    #[tracing::instrument(skip(self), fields(user = %user_id))]
    pub async fn select_resource(
        &self,
        user_id: &UserId,
        id: &ConnectionId,
        resource_id: &str,
    ) -> Result<Connection> {
        if resource_id.trim().is_empty() {
            return Err(CoreError::validation("resource_id", "Resource id is required"));
        }

        let resources = self.list_resources(user_id, id).await?;
        let resource = resources
            .into_iter()
            .find(|r| r.id == resource_id)
            .ok_or_else(|| {
                CoreError::validation(
                    "resource_id",
                    format!("'{}' is not visible to this connection", resource_id),
                )
            })?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut connection = self.owned_connection(user_id, id).await?;
        connection.set_resource(resource.id, resource.name);
        self.store.upsert_connection(&connection).await?;
        Ok(connection)
    }

    /// Record a successful fetch
    pub async fn mark_synced(&self, id: &ConnectionId) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        if let Some(mut connection) = self.store.get_connection(id).await? {
            connection.mark_synced();
            self.store.upsert_connection(&connection).await?;
        }
        Ok(())
    }

    /// Record an auth failure seen during a fetch
    pub async fn mark_failed(&self, id: &ConnectionId, error: &CoreError) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        if let Some(mut connection) = self.store.get_connection(id).await? {
            connection.mark_error(error.to_string());
            self.store.upsert_connection(&connection).await?;
        }
        Ok(())
    }

    pub fn health(&self, connection: &Connection) -> ConnectionHealth {
        connection_health(connection.expires_at, Utc::now(), self.warning_days)
    }
}

/// Only same-site relative paths are accepted as a post-connect redirect
fn validate_return_to(return_to: Option<String>, client_id: &ClientId) -> Result<String> {
    match return_to {
        None => Ok(format!("/clients/{}", client_id)),
        Some(path) if path.starts_with('/') && !path.starts_with("//") && !path.contains("://") => {
            Ok(path)
        }
        Some(_) => Err(CoreError::validation(
            "return_to",
            "return_to must be a relative path",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{FakeAdapter, FakeTokenClient, seeded_store};
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn manager(tokens: Arc<FakeTokenClient>, store: Arc<dyn Store>) -> ConnectionManager {
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(FakeAdapter::new(Platform::GoogleAnalytics).with_resources(
                vec![Resource {
                    id: "properties/1".to_string(),
                    name: "Main site".to_string(),
                    parent: None,
                }],
            )))
            .with_adapter(Arc::new(FakeAdapter::new(Platform::MetaAds)));
        ConnectionManager::new(store, tokens, registry, 7)
    }

    async fn connected(
        manager: &ConnectionManager,
        user: UserId,
        client: ClientId,
        platform: Platform,
    ) -> Connection {
        let start = manager.connect(&user, &client, platform, None).await.unwrap();
        manager
            .complete_connect(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(start.state.encode().unwrap()),
                ..Default::default()
            })
            .await
            .unwrap()
            .connection
    }

    #[tokio::test]
    async fn test_connect_and_complete() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());

        let start = manager
            .connect(&user, &client.id, Platform::GoogleAnalytics, Some("/clients/acme".to_string()))
            .await
            .unwrap();
        assert!(start.authorization_url.contains("google_analytics"));
        assert!(store.list_client_connections(&client.id).await.unwrap().is_empty());

        let done = manager
            .complete_connect(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(start.state.encode().unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(done.return_to, "/clients/acme");
        assert_eq!(done.connection.status, ConnectionStatus::Active);
        assert_eq!(done.connection.resource_id(), Some("properties/1"));
        assert!(done.connection.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_keeps_id() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store.clone());

        let first = connected(&manager, user, client.id, Platform::MetaAds).await;
        let second = connected(&manager, user, client.id, Platform::MetaAds).await;

        assert_eq!(first.id, second.id);
        let all = store.list_client_connections(&client.id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_foreign_client_and_bad_redirect() {
        let (store, _user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);

        let stranger = UserId::generate();
        let err = manager
            .connect(&stranger, &client.id, Platform::MetaAds, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PermissionDenied { .. }));

        let err = manager
            .connect(&client.owner_id, &client.id, Platform::MetaAds, Some("https://evil.example".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure { .. }));
    }

    #[tokio::test]
    async fn test_callback_denied_by_user() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);
        let start = manager
            .connect(&user, &client.id, Platform::MetaAds, None)
            .await
            .unwrap();

        let err = manager
            .complete_connect(CallbackParams {
                state: Some(start.state.encode().unwrap()),
                error: Some("access_denied".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::OAuthError { .. }));
    }

    #[tokio::test]
    async fn test_refresh_failure_marks_error_and_keeps_record() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());
        let connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;

        tokens.fail_refresh_with_auth();
        let err = manager.refresh(&user, &connection.id).await.unwrap_err();
        assert!(err.is_auth_failure());

        let stored = store.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConnectionStatus::Error);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_transient_refresh_failure_keeps_status() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());
        let mut connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;
        connection.expires_at = Utc::now() + Duration::minutes(1);
        store.upsert_connection(&connection).await.unwrap();

        tokens.fail_refresh_transiently();
        let err = manager.ensure_fresh(connection.clone()).await.unwrap_err();
        assert!(err.is_transient());

        let stored = store.get_connection(&connection.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ConnectionStatus::Active);
        assert_eq!(stored.last_error, None);
        assert!(logs_contain("Credential refresh failed"));
    }

    #[tokio::test]
    async fn test_complete_connect_rejects_refused_credential() {
        let (store, user, client) = seeded_store().await;
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(FakeAdapter::new(Platform::MetaAds).failing_auth()));
        let manager = ConnectionManager::new(store.clone(), Arc::new(FakeTokenClient::new()), registry, 7);
        let start = manager
            .connect(&user, &client.id, Platform::MetaAds, None)
            .await
            .unwrap();

        let err = manager
            .complete_connect(CallbackParams {
                code: Some("auth-code".to_string()),
                state: Some(start.state.encode().unwrap()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(err.is_auth_failure());
        assert!(store.list_client_connections(&client.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_connect_survives_unreachable_platform() {
        let (store, user, client) = seeded_store().await;
        let registry = PlatformRegistry::new()
            .with_adapter(Arc::new(FakeAdapter::new(Platform::MetaAds).failing_transient()));
        let manager = ConnectionManager::new(store.clone(), Arc::new(FakeTokenClient::new()), registry, 7);

        let connection = connected(&manager, user, client.id, Platform::MetaAds).await;
        assert_eq!(connection.status, ConnectionStatus::Active);
        assert_eq!(store.list_client_connections(&client.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_success_updates_expiry() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());
        let mut connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;

        connection.expires_at = Utc::now() + Duration::minutes(2);
        connection.mark_error("stale");
        store.upsert_connection(&connection).await.unwrap();

        let refreshed = manager.refresh(&user, &connection.id).await.unwrap();
        assert_eq!(refreshed.status, ConnectionStatus::Active);
        assert!(refreshed.expires_at > Utc::now() + Duration::minutes(30));
        assert_eq!(tokens.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn test_ensure_fresh_only_near_expiry() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());
        let mut connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;

        let fresh = manager.ensure_fresh(connection.clone()).await.unwrap();
        assert_eq!(fresh.access_token, connection.access_token);
        assert_eq!(tokens.refresh_calls(), 0);

        connection.expires_at = Utc::now() + Duration::minutes(1);
        store.upsert_connection(&connection).await.unwrap();
        let renewed = manager.ensure_fresh(connection).await.unwrap();
        assert_eq!(tokens.refresh_calls(), 1);
        assert!(!renewed.needs_refresh());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disconnect_deletes_even_when_revoke_fails() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = manager(tokens.clone(), store.clone());
        let connection = connected(&manager, user, client.id, Platform::MetaAds).await;

        tokens.fail_revoke();
        let outcome = manager.disconnect(&user, &connection.id).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.revoked);
        assert!(store.get_connection(&connection.id).await.unwrap().is_none());
        assert!(logs_contain("credential revocation failed"));
    }

    #[tokio::test]
    async fn test_disconnect_unknown_is_structured_failure() {
        let (store, user, _client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);

        let outcome = manager
            .disconnect(&user, &ConnectionId::generate())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_twice_reports_failure_second_time() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);
        let connection = connected(&manager, user, client.id, Platform::MetaAds).await;

        let first = manager.disconnect(&user, &connection.id).await.unwrap();
        assert!(first.success);

        let second = manager.disconnect(&user, &connection.id).await.unwrap();
        assert!(!second.success);
        assert!(!second.revoked);
        assert!(second.error.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_keeps_lock_while_others_wait() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);
        let connection = connected(&manager, user, client.id, Platform::MetaAds).await;

        let waiting = manager.lock_for(&connection.id);
        manager.disconnect(&user, &connection.id).await.unwrap();
        assert!(Arc::ptr_eq(&waiting, &manager.lock_for(&connection.id)));

        drop(waiting);
        manager.disconnect(&user, &connection.id).await.unwrap();
        assert!(!manager.locks.contains_key(&connection.id));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_and_disconnect_never_resurrects() {
        let (store, user, client) = seeded_store().await;
        let tokens = Arc::new(FakeTokenClient::new());
        let manager = Arc::new(manager(tokens, store.clone()));
        let connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;

        let m1 = manager.clone();
        let m2 = manager.clone();
        let id = connection.id;
        let (refresh, disconnect) = tokio::join!(
            tokio::spawn(async move { m1.refresh(&user, &id).await }),
            tokio::spawn(async move { m2.disconnect(&user, &id).await }),
        );

        let _ = refresh.unwrap();
        assert!(disconnect.unwrap().unwrap().success);
        assert!(store.get_connection(&connection.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_select_resource_validates_against_discovery() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store);
        let connection = connected(&manager, user, client.id, Platform::GoogleAnalytics).await;

        let err = manager
            .select_resource(&user, &connection.id, "properties/999")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailure { .. }));

        let updated = manager
            .select_resource(&user, &connection.id, "properties/1")
            .await
            .unwrap();
        assert_eq!(updated.resource_name(), Some("Main site"));
    }

    #[tokio::test]
    async fn test_list_connections_reports_health() {
        let (store, user, client) = seeded_store().await;
        let manager = manager(Arc::new(FakeTokenClient::new()), store.clone());
        let mut connection = connected(&manager, user, client.id, Platform::MetaAds).await;
        connection.expires_at = Utc::now() - Duration::hours(1);
        store.upsert_connection(&connection).await.unwrap();

        let listed = manager.list_connections(&user, &client.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ConnectionStatus::Expired);
        assert_eq!(listed[0].health.status, crate::connection::HealthStatus::Expired);
    }
}
