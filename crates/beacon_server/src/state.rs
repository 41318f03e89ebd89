//! Application state

use std::sync::Arc;
use std::time::Instant;

use beacon_core::aggregation::AggregationEngine;
use beacon_core::completion::CompletionPipeline;
use beacon_core::config::BeaconConfig;
use beacon_core::lifecycle::ConnectionManager;
use beacon_core::model::{GenAiProvider, ModelProvider};
use beacon_core::oauth::{HttpTokenClient, TokenClient};
use beacon_core::platform::PlatformRegistry;
use beacon_core::rate_limit::RateLimiter;
use beacon_core::store::{Store, SurrealStore};

use crate::error::ServerResult;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BeaconConfig>,
    pub manager: Arc<ConnectionManager>,
    pub engine: Arc<AggregationEngine>,
    pub pipeline: Arc<CompletionPipeline>,
    pub jwt_encoding_key: jsonwebtoken::EncodingKey,
    pub jwt_decoding_key: jsonwebtoken::DecodingKey,
    pub started_at: Instant,
}

impl AppState {
    /// Connect the database and build every service from configuration
    pub async fn new(config: BeaconConfig) -> ServerResult<Self> {
        let store: Arc<dyn Store> = Arc::new(SurrealStore::connect(&config.database).await?);
        let tokens: Arc<dyn TokenClient> = Arc::new(HttpTokenClient::from_config(&config));
        let adapters = PlatformRegistry::from_config(&config);
        let provider: Arc<dyn ModelProvider> = Arc::new(GenAiProvider::new(config.model.clone()));

        Ok(Self::from_parts(config, store, tokens, adapters, provider))
    }

    /// Wire the services over the given collaborators
    pub fn from_parts(
        config: BeaconConfig,
        store: Arc<dyn Store>,
        tokens: Arc<dyn TokenClient>,
        adapters: PlatformRegistry,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        let manager = Arc::new(ConnectionManager::new(
            store.clone(),
            tokens,
            adapters,
            config.health.warning_days,
        ));
        let engine = Arc::new(AggregationEngine::new(manager.clone(), &config.aggregation));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let pipeline = Arc::new(
            CompletionPipeline::new(store, engine.clone(), limiter, provider)
                .with_model_config(&config.model),
        );

        let jwt_encoding_key =
            jsonwebtoken::EncodingKey::from_secret(config.server.jwt_secret.as_bytes());
        let jwt_decoding_key =
            jsonwebtoken::DecodingKey::from_secret(config.server.jwt_secret.as_bytes());

        Self {
            config: Arc::new(config),
            manager,
            engine,
            pipeline,
            jwt_encoding_key,
            jwt_decoding_key,
            started_at: Instant::now(),
        }
    }
}
