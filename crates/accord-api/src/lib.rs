pub mod error;
pub mod matches;
pub mod middleware;
pub mod ops;
pub mod rooms;
pub mod suggestions;
pub mod users;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tracing::error;

use accord_engine::Engine;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    pub jwt_secret: String,
}

/// Every route requires a bearer token. Operator routes additionally check
/// the `operator` claim.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users/me", put(users::upsert_profile))
        .route("/users/me/progress", get(users::get_progress))
        .route("/matches", get(matches::list_matches).post(matches::propose))
        .route("/matches/{match_id}", get(matches::get_match))
        .route("/matches/{match_id}/accept", post(matches::accept))
        .route("/matches/{match_id}/decline", post(matches::decline))
        .route("/matches/{match_id}/cancel", post(matches::cancel))
        .route("/cooldowns/{fid}", get(matches::get_cooldown))
        .route(
            "/suggestions",
            get(suggestions::list_received).post(suggestions::create),
        )
        .route("/suggestions/sent", get(suggestions::list_sent))
        .route("/suggestions/sent/{suggestion_id}", get(suggestions::get_sent))
        .route("/suggestions/{suggestion_id}", get(suggestions::get_received))
        .route("/suggestions/{suggestion_id}/accept", post(suggestions::accept))
        .route("/suggestions/{suggestion_id}/decline", post(suggestions::decline))
        .route("/suggestions/{suggestion_id}/withdraw", post(suggestions::withdraw))
        .route("/rooms/{room_id}", get(rooms::get_room))
        .route("/rooms/{room_id}/join", post(rooms::join))
        .route(
            "/rooms/{room_id}/messages",
            get(rooms::get_messages).post(rooms::send_message),
        )
        .route("/rooms/{room_id}/complete", post(rooms::mark_completed))
        .route("/rooms/{room_id}/close", post(rooms::close))
        .route("/ops/sweep", post(ops::sweep))
        .route("/ops/rooms/{room_id}/force-close", post(ops::force_close))
        .route(
            "/ops/users/{fid}/recompute",
            post(ops::recompute_achievements),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ))
        .with_state(state)
}

/// Run an engine call off the async runtime. The engine talks to SQLite
/// synchronously.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> accord_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?
        .map_err(ApiError::from)
}
