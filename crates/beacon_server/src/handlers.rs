//! HTTP request handlers

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

pub mod chat;
pub mod connections;
pub mod conversations;
pub mod health;
pub mod metrics;

use crate::{middleware::require_auth, state::AppState};

/// Build all API routes
pub fn routes(state: AppState) -> Router<AppState> {
    let protected = Router::new()
        // Connections
        .route("/connections/connect", post(connections::connect))
        .route("/connections/:id", delete(connections::disconnect))
        .route("/connections/:id/refresh", post(connections::refresh))
        .route("/connections/:id/resources", get(connections::list_resources))
        .route("/connections/:id/resource", put(connections::select_resource))
        .route("/clients/:client_id/connections", get(connections::list))
        // Metrics
        .route("/clients/:client_id/metrics", get(metrics::client_metrics))
        .route("/dashboard", get(metrics::dashboard))
        // Chat
        .route("/chat", post(chat::send_message))
        .route("/chat/stream", post(chat::stream_message))
        .route("/conversations", get(conversations::list))
        .route("/conversations/:id", get(conversations::get))
        .route_layer(middleware::from_fn_with_state(state, require_auth));

    Router::new()
        .route("/health", get(health::health_check))
        // The platform redirects the browser here, so it carries no bearer token
        .route("/connections/callback", get(connections::callback))
        .merge(protected)
}
