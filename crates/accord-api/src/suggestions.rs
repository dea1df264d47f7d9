use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use accord_types::api::{Claims, SuggestRequest};

use crate::error::ApiError;
use crate::matches::ListQuery;
use crate::{AppState, blocking};

// Handlers under /suggestions/{id} serve participants and never return the
// suggester. The suggester's own views live under /suggestions/sent.

pub async fn create(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SuggestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = blocking(&state, move |engine| {
        engine
            .suggestions()
            .create(claims.sub, req.party_a, req.party_b, &req.message)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_received(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let list = blocking(&state, move |engine| {
        engine.suggestions().list_for_participant(claims.sub, query.limit)
    })
    .await?;
    Ok(Json(list))
}

pub async fn get_received(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |engine| {
        engine.suggestions().view_for_participant(suggestion_id, claims.sub)
    })
    .await?;
    Ok(Json(view))
}

pub async fn list_sent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let list = blocking(&state, move |engine| {
        engine.suggestions().list_by_suggester(claims.sub, query.limit)
    })
    .await?;
    Ok(Json(list))
}

pub async fn get_sent(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let record = blocking(&state, move |engine| {
        engine.suggestions().view_for_suggester(suggestion_id, claims.sub)
    })
    .await?;
    Ok(Json(record))
}

pub async fn accept(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state, move |engine| {
        engine.suggestions().accept(suggestion_id, claims.sub)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn decline(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state, move |engine| {
        engine.suggestions().decline(suggestion_id, claims.sub)
    })
    .await?;
    Ok(Json(outcome))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Path(suggestion_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state, move |engine| {
        engine.suggestions().withdraw(suggestion_id, claims.sub)
    })
    .await?;
    Ok(Json(outcome))
}
