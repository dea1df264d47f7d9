use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use accord_types::api::{Claims, CooldownStatus, ProposeRequest};
use accord_types::models::{Fid, PairKey};

use crate::error::ApiError;
use crate::{AppState, blocking};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

pub(crate) fn default_limit() -> u32 {
    50
}

pub async fn propose(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProposeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let creator = claims.sub;
    let party_a = req.party_a.unwrap_or(creator);
    let created = blocking(&state, move |engine| {
        engine
            .matches()
            .propose(creator, party_a, req.party_b, &req.message)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_matches(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let views = blocking(&state, move |engine| {
        engine.matches().list_for(claims.sub, query.limit)
    })
    .await?;
    Ok(Json(views))
}

pub async fn get_match(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let view = blocking(&state, move |engine| engine.matches().get(match_id, claims.sub)).await?;
    Ok(Json(view))
}

pub async fn accept(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        blocking(&state, move |engine| engine.matches().accept(match_id, claims.sub)).await?;
    Ok(Json(outcome))
}

pub async fn decline(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        blocking(&state, move |engine| engine.matches().decline(match_id, claims.sub)).await?;
    Ok(Json(outcome))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(match_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome =
        blocking(&state, move |engine| engine.matches().cancel(match_id, claims.sub)).await?;
    Ok(Json(outcome))
}

/// Whether the caller and `fid` may currently be proposed to each other.
pub async fn get_cooldown(
    State(state): State<AppState>,
    Path(fid): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let other = Fid(fid);
    let expires_at = blocking(&state, move |engine| {
        engine
            .cooldowns()
            .cooldown_expiry(PairKey::new(claims.sub, other))
    })
    .await?;
    Ok(Json(CooldownStatus {
        with: other,
        in_cooldown: expires_at.is_some(),
        expires_at,
    }))
}
