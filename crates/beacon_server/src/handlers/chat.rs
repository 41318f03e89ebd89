//! Chat endpoints
//!
//! The streamed variant answers with server-sent events whose data is one
//! JSON object per frame: `{"conversationId": ..}` first, then
//! `{"content": ..}` chunks, and `{"error": ..}` if the reply fails midway.

use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use beacon_api::{ApiError, requests::ChatRequestBody, responses::ChatResponse};
use beacon_core::completion::StreamFrame;
use beacon_core::id::UserId;
use futures::{Stream, StreamExt};

use crate::state::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Json<ChatResponse>, ApiError> {
    let outcome = state.pipeline.send_message(&user_id, body.into()).await?;
    Ok(Json(outcome.into()))
}

fn frame_event(frame: &StreamFrame) -> Event {
    Event::default().json_data(frame).unwrap_or_else(|e| {
        tracing::error!("Failed to encode stream frame: {}", e);
        Event::default().data(r#"{"error":"Failed to encode response"}"#)
    })
}

/// Rejections before the user turn is stored (rate limit, unknown client)
/// come back as an error status; later failures arrive as an error frame.
pub async fn stream_message(
    State(state): State<AppState>,
    Extension(user_id): Extension<UserId>,
    Json(body): Json<ChatRequestBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let reply = state.pipeline.stream_message(&user_id, body.into()).await?;
    let events = reply.frames.map(|frame| Ok(frame_event(&frame)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
