//! Beacon API Server library
//!
//! HTTP surface over the connection lifecycle, aggregation and chat services.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::{ServerError, ServerResult};
pub use state::AppState;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use beacon_core::config::BeaconConfig;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// CORS policy from the configured origins; `*` allows any origin
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(allowed)
}

/// Full application router with state applied
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);

    Router::new()
        .nest("/api/v1", handlers::routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Start the Beacon API server
pub async fn start_server(config: BeaconConfig) -> ServerResult<()> {
    use std::net::SocketAddr;

    tracing::info!("Starting Beacon API Server on {}", config.server.bind_address);

    let addr: SocketAddr = config.server.bind_address.parse()?;
    let state = AppState::new(config).await?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
