#![cfg(test)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::client::Client;
use crate::connection::{Credential, Platform};
use crate::id::UserId;
use crate::oauth::{PkceChallenge, TokenClient, TokenResponse};
use crate::platform::{
    DateRange, EntityMetrics, MetricTotals, NormalizedMetrics, PlatformAdapter, Resource,
};
use crate::store::{ClientStore, MemoryStore, Store};
use crate::{CoreError, Result};

/// Memory store holding one client, returned with its owner
pub async fn seeded_store() -> (Arc<dyn Store>, UserId, Client) {
    let store = MemoryStore::default();
    let owner = UserId::generate();
    let client = Client::new(owner, "Acme Co").with_website("https://acme.example");
    store.save_client(&client).await.unwrap();
    (Arc::new(store), owner, client)
}

fn token_response(access_token: &str, refresh_token: Option<&str>) -> TokenResponse {
    TokenResponse {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(str::to_string),
        expires_in: Some(3600),
        scope: None,
        token_type: Some("Bearer".to_string()),
        extra: Default::default(),
    }
}

#[derive(Debug, Default)]
pub struct FakeTokenClient {
    refresh_fails: AtomicBool,
    refresh_transient: AtomicBool,
    revoke_fails: AtomicBool,
    refresh_calls: AtomicUsize,
}

impl FakeTokenClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_refresh_with_auth(&self) {
        self.refresh_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_refresh_transiently(&self) {
        self.refresh_transient.store(true, Ordering::SeqCst);
    }

    pub fn fail_revoke(&self) {
        self.revoke_fails.store(true, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenClient for FakeTokenClient {
    fn authorization_url(
        &self,
        platform: Platform,
        state: &str,
        pkce: &PkceChallenge,
    ) -> Result<String> {
        Ok(format!(
            "https://auth.example/{}?state={}&code_challenge={}",
            platform.as_str(),
            state,
            pkce.challenge
        ))
    }

    async fn exchange_code(
        &self,
        _platform: Platform,
        code: &str,
        _pkce: &PkceChallenge,
    ) -> Result<TokenResponse> {
        Ok(token_response(
            &format!("access-for-{}", code),
            Some("refresh-token"),
        ))
    }

    async fn refresh(&self, platform: Platform, _credential: &str) -> Result<TokenResponse> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.refresh_fails.load(Ordering::SeqCst) {
            return Err(CoreError::auth_failure(platform, "invalid_grant"));
        }
        if self.refresh_transient.load(Ordering::SeqCst) {
            return Err(CoreError::transient(
                platform.as_str(),
                "refresh",
                "503 Service Unavailable",
            ));
        }
        Ok(token_response(&format!("refreshed-{}", call), None))
    }

    async fn revoke(&self, platform: Platform, _token: &str) -> Result<()> {
        if self.revoke_fails.load(Ordering::SeqCst) {
            return Err(CoreError::transient(
                platform.as_str(),
                "revoke",
                "connection reset",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum FakeFailure {
    Auth,
    Transient,
}

/// Scripted adapter. Answers with fixed totals, a failure, or after a delay.
#[derive(Debug)]
pub struct FakeAdapter {
    platform: Platform,
    resources: Vec<Resource>,
    totals: MetricTotals,
    top_category: Option<String>,
    failure: Option<FakeFailure>,
    delay: Option<Duration>,
    fetches: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            resources: Vec::new(),
            totals: MetricTotals::default(),
            top_category: None,
            failure: None,
            delay: None,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_totals(mut self, totals: MetricTotals) -> Self {
        self.totals = totals;
        self
    }

    pub fn with_sessions(self, sessions: u64) -> Self {
        self.with_totals(MetricTotals {
            sessions,
            ..Default::default()
        })
    }

    pub fn with_top_category(mut self, category: impl Into<String>) -> Self {
        self.top_category = Some(category.into());
        self
    }

    pub fn failing_auth(mut self) -> Self {
        self.failure = Some(FakeFailure::Auth);
        self
    }

    pub fn failing_transient(mut self) -> Self {
        self.failure = Some(FakeFailure::Transient);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Result<()> {
        match self.failure {
            None => Ok(()),
            Some(FakeFailure::Auth) => Err(CoreError::auth_failure(self.platform, "token revoked")),
            Some(FakeFailure::Transient) => Err(CoreError::transient(
                self.platform.as_str(),
                "fetch_metrics",
                "503 Service Unavailable",
            )),
        }
    }
}

#[async_trait]
impl PlatformAdapter for FakeAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn test_connection(&self, _credential: &Credential) -> Result<bool> {
        crate::platform::probe_result(self.fail())
    }

    async fn fetch_metrics(
        &self,
        _credential: &Credential,
        _range: Option<DateRange>,
        _selector: Option<&str>,
    ) -> Result<NormalizedMetrics> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.fail()?;

        if self.totals.is_zero() {
            return Ok(NormalizedMetrics::empty(self.platform));
        }
        let mut entity = EntityMetrics::new("fake-1", "Fake", self.totals);
        if let Some(category) = &self.top_category {
            entity.breakdown.insert(category.clone(), self.totals.sessions.max(1));
        }
        Ok(NormalizedMetrics::from_entities(self.platform, vec![entity], None))
    }

    async fn list_resources(&self, _credential: &Credential) -> Result<Vec<Resource>> {
        self.fail()?;
        Ok(self.resources.clone())
    }
}
