use accord_types::models::{CloseReason, Fid};
use chrono::{DateTime, Utc};

/// Expected, recoverable outcomes of a lifecycle call, plus `Storage` for
/// infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("cannot {action} a {entity} in status {status}")]
    InvalidStateTransition {
        entity: &'static str,
        action: &'static str,
        status: String,
    },

    #[error("state changed concurrently, refresh and try again")]
    ConcurrentModification,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("pair is in cooldown until {expires_at}")]
    CooldownActive { expires_at: DateTime<Utc> },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{fid} already has {limit} pending proposals")]
    PendingLimitReached { fid: Fid, limit: u32 },

    #[error("room is closed")]
    RoomClosed {
        closed_at: Option<DateTime<Utc>>,
        reason: Option<CloseReason>,
    },

    #[error("room time ran out at {expired_at}")]
    RoomExpired { expired_at: DateTime<Utc> },

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl LifecycleError {
    /// Stable machine-readable name, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::ConcurrentModification => "concurrent_modification",
            Self::Validation(_) => "validation_error",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::Conflict(_) => "conflict",
            Self::PendingLimitReached { .. } => "pending_limit_reached",
            Self::RoomClosed { .. } => "room_closed",
            Self::RoomExpired { .. } => "room_expired",
            Self::Storage(_) => "internal",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<rusqlite::Error> for LifecycleError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
