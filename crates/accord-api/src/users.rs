use axum::{Extension, Json, extract::State, response::IntoResponse};

use accord_types::api::{Claims, UpsertProfileRequest};
use accord_types::models::UserProfile;

use crate::error::ApiError;
use crate::{AppState, blocking};

/// Register the caller or refresh their profile.
pub async fn upsert_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpsertProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = UserProfile {
        fid: claims.sub,
        username: req.username,
        display_name: req.display_name,
        avatar_url: req.avatar_url,
        bio: req.bio,
    };
    let saved = blocking(&state, move |engine| engine.register_profile(profile)).await?;
    Ok(Json(saved))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let progress = blocking(&state, move |engine| engine.achievements().progress(claims.sub)).await?;
    Ok(Json(progress))
}
