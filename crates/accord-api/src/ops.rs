use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use accord_types::api::{Claims, ForceCloseRequest};
use accord_types::models::Fid;

use crate::error::ApiError;
use crate::middleware::require_operator;
use crate::{AppState, blocking};

/// Run a maintenance pass now, regardless of the schedule.
pub async fn sweep(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&claims)?;
    let report = blocking(&state, |engine| engine.scheduler().run_maintenance()).await?;
    info!("Operator {} ran maintenance", claims.sub);
    Ok(Json(report))
}

pub async fn force_close(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Option<Json<ForceCloseRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&claims)?;
    let note = body.and_then(|Json(req)| req.note);
    let outcome = blocking(&state, move |engine| {
        engine.rooms().force_close(room_id, note.as_deref())
    })
    .await?;
    info!("Operator {} force-closed room {}", claims.sub, room_id);
    Ok(Json(outcome))
}

/// Re-run every achievement check for a user from source data.
pub async fn recompute_achievements(
    State(state): State<AppState>,
    Path(fid): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&claims)?;
    let fid = Fid(fid);
    let progress = blocking(&state, move |engine| {
        let awarded = engine.achievements().recompute(fid)?;
        info!(
            "Recompute for {} awarded {} achievements",
            fid,
            awarded.iter().filter(|r| r.awarded).count()
        );
        engine.achievements().progress(fid)
    })
    .await?;
    Ok(Json(progress))
}
