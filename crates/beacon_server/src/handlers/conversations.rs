use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use beacon_api::{
    ApiError, requests::ConversationListParams, responses::ConversationListResponse,
};
use beacon_core::conversation::ConversationWithMessages;
use beacon_core::id::{ConversationId, UserId};

use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Query(params): Query<ConversationListParams>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    let conversations = state
        .pipeline
        .list_conversations(&user_id, params.client_id.as_ref())
        .await?;
    Ok(Json(ConversationListResponse { conversations }))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Path(id): Path<ConversationId>,
) -> Result<Json<ConversationWithMessages>, ApiError> {
    Ok(Json(state.pipeline.get_conversation(&user_id, &id).await?))
}
