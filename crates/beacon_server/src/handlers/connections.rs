//! Connection lifecycle endpoints

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::Redirect,
};
use beacon_api::{
    ApiError,
    requests::{ConnectRequest, SelectResourceRequest},
    responses::{
        ConnectResponse, ConnectionListResponse, DisconnectResponse, RefreshResponse,
        ResourceListResponse,
    },
};
use beacon_core::id::{ClientId, ConnectionId, UserId};
use beacon_core::lifecycle::{CallbackParams, ConnectionSummary};
use beacon_core::oauth::AuthState;

use crate::state::AppState;

/// Start an OAuth connection and hand back the authorization URL
pub async fn connect(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let start = state
        .manager
        .connect(
            &user_id,
            &request.client_id,
            request.platform,
            request.return_to,
        )
        .await?;

    Ok(Json(ConnectResponse {
        auth_url: start.authorization_url,
    }))
}

/// OAuth redirect target. Sends the browser back to where the connect started.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Result<Redirect, ApiError> {
    let raw_state = params.state.clone();
    match state.manager.complete_connect(params).await {
        Ok(completed) => Ok(Redirect::to(&completed.return_to)),
        Err(e) => {
            let api_error = ApiError::from(e);
            // a readable state still tells us where to send the user
            match raw_state.as_deref().map(AuthState::decode) {
                Some(Ok(auth_state)) if is_relative_path(&auth_state.return_to) => {
                    Ok(Redirect::to(&failure_redirect(
                        &auth_state.return_to,
                        api_error.error_type(),
                    )))
                }
                _ => Err(api_error),
            }
        }
    }
}

/// The state was not verified, so only same-site paths are followed
fn is_relative_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.contains("://")
}

fn failure_redirect(return_to: &str, error_type: &str) -> String {
    let separator = if return_to.contains('?') { '&' } else { '?' };
    format!("{}{}connect_error={}", return_to, separator, error_type)
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(client_id): Path<ClientId>,
) -> Result<Json<ConnectionListResponse>, ApiError> {
    let connections = state.manager.list_connections(&user_id, &client_id).await?;
    Ok(Json(ConnectionListResponse {
        client_id,
        connections,
    }))
}

/// Manual refresh. Credential failures are reported in the body; a missing
/// or foreign connection is an error status.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<ConnectionId>,
) -> Result<Json<RefreshResponse>, ApiError> {
    match state.manager.refresh(&user_id, &id).await {
        Ok(connection) => Ok(Json(RefreshResponse {
            success: true,
            connection: Some(state.manager.summarize(&connection)),
            error: None,
        })),
        Err(e) if e.is_auth_failure() || e.is_transient() => {
            tracing::info!(connection = %id, "Manual refresh failed: {}", e);
            Ok(Json(RefreshResponse {
                success: false,
                connection: None,
                error: Some(e.user_message()),
            }))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn disconnect(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<ConnectionId>,
) -> Result<Json<DisconnectResponse>, ApiError> {
    let outcome = state.manager.disconnect(&user_id, &id).await?;
    Ok(Json(outcome.into()))
}

pub async fn list_resources(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<ConnectionId>,
) -> Result<Json<ResourceListResponse>, ApiError> {
    let resources = state.manager.list_resources(&user_id, &id).await?;
    let selected = state
        .manager
        .connection_summary(&user_id, &id)
        .await?
        .resource_id;
    Ok(Json(ResourceListResponse {
        resources,
        selected,
    }))
}

pub async fn select_resource(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<ConnectionId>,
    Json(request): Json<SelectResourceRequest>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let connection = state
        .manager
        .select_resource(&user_id, &id, &request.resource_id)
        .await?;
    Ok(Json(state.manager.summarize(&connection)))
}
