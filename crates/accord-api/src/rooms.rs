use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use accord_types::api::{Claims, SendMessageRequest};

use crate::error::ApiError;
use crate::matches::default_limit;
use crate::{AppState, blocking};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message from the previous page.
    pub before: Option<Uuid>,
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |engine| engine.rooms().get(room_id, claims.sub)).await?;
    Ok(Json(view))
}

/// Entering the room. The first join starts its clock.
pub async fn join(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |engine| engine.rooms().join(room_id, claims.sub)).await?;
    Ok(Json(view))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = blocking(&state, move |engine| {
        engine
            .rooms()
            .list_messages(room_id, claims.sub, query.limit, query.before)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = blocking(&state, move |engine| {
        engine.rooms().send_message(room_id, claims.sub, &req.content)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_completed(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state, move |engine| {
        engine.rooms().mark_completed(room_id, claims.sub)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn close(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |engine| engine.rooms().close(room_id, claims.sub)).await?;
    Ok(Json(view))
}
