//! Aggregated metrics and the dashboard

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use beacon_api::{ApiError, requests::MetricsParams};
use beacon_core::aggregation::{AggregatedMetrics, DashboardStats};
use beacon_core::id::{ClientId, UserId};

use crate::state::AppState;

pub async fn client_metrics(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(client_id): Path<ClientId>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<AggregatedMetrics>, ApiError> {
    let query = params.into_query()?;
    let metrics = state
        .engine
        .aggregate_client(&user_id, &client_id, &query)
        .await?;
    Ok(Json(metrics))
}

/// Sections that fail are listed in `unavailable`; the call itself only
/// fails on a bad query.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<DashboardStats>, ApiError> {
    let query = params.into_query()?;
    Ok(Json(state.engine.dashboard(&user_id, &query).await))
}
