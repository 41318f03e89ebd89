//! Health check endpoint

use axum::{Json, extract::State};
use beacon_api::responses::{ComponentStatus, HealthResponse, HealthStatus};
use beacon_core::id::UserId;
use beacon_core::store::ClientStore;

use crate::state::AppState;

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // any read will do; the nil owner has no clients
    let probe = UserId::from_uuid(uuid::Uuid::nil());
    let (status, database_status) = match state.manager.store().list_clients(&probe).await {
        Ok(_) => (HealthStatus::Healthy, ComponentStatus::Ok),
        Err(e) => {
            tracing::warn!("Health probe failed: {}", e);
            (HealthStatus::Degraded, ComponentStatus::Error)
        }
    };

    Json(HealthResponse {
        status,
        version: beacon_api::API_VERSION.to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        database_status,
    })
}
