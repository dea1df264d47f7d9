use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;
use uuid::Uuid;

use accord_engine::LifecycleError;
use accord_types::api::ErrorBody;

#[derive(Debug)]
pub enum ApiError {
    Lifecycle(LifecycleError),
    Internal,
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        Self::Lifecycle(e)
    }
}

pub fn status_for(e: &LifecycleError) -> StatusCode {
    match e {
        LifecycleError::NotFound { .. } => StatusCode::NOT_FOUND,
        LifecycleError::Forbidden(_) => StatusCode::FORBIDDEN,
        LifecycleError::InvalidStateTransition { .. }
        | LifecycleError::ConcurrentModification
        | LifecycleError::Conflict(_)
        | LifecycleError::RoomClosed { .. } => StatusCode::CONFLICT,
        LifecycleError::Validation(_) => StatusCode::BAD_REQUEST,
        LifecycleError::CooldownActive { .. } | LifecycleError::PendingLimitReached { .. } => {
            StatusCode::TOO_MANY_REQUESTS
        }
        LifecycleError::RoomExpired { .. } => StatusCode::GONE,
        LifecycleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Structured body for an engine error. Storage failures get a generic
/// message; the detail goes to the log only.
pub fn body_for(e: &LifecycleError) -> ErrorBody {
    let mut body = ErrorBody {
        kind: e.kind(),
        message: e.to_string(),
        expires_at: None,
        status: None,
        entity_id: None,
    };
    match e {
        LifecycleError::NotFound { id, .. } => body.entity_id = id.parse::<Uuid>().ok(),
        LifecycleError::InvalidStateTransition { status, .. } => body.status = Some(status.clone()),
        LifecycleError::CooldownActive { expires_at } => body.expires_at = Some(*expires_at),
        LifecycleError::RoomExpired { expired_at } => body.expires_at = Some(*expired_at),
        LifecycleError::RoomClosed { reason, .. } => {
            body.status = reason.map(|r| r.as_str().to_string());
        }
        LifecycleError::Storage(_) => body.message = "internal error".into(),
        _ => {}
    }
    body
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Lifecycle(e) => {
                if let LifecycleError::Storage(inner) = &e {
                    error!("Storage failure: {:#}", inner);
                }
                (status_for(&e), Json(body_for(&e))).into_response()
            }
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    kind: "internal",
                    message: "internal error".into(),
                    expires_at: None,
                    status: None,
                    entity_id: None,
                }),
            )
                .into_response(),
        }
    }
}
