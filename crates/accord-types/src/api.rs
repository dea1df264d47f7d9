use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Fid, Match, ParticipantCard, Room, RoomState};

// -- JWT Claims --

/// Bearer token claims. Tokens are minted by the surrounding identity layer;
/// `sub` is the caller's fid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Fid,
    #[serde(default)]
    pub operator: bool,
    pub exp: usize,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpsertProfileRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

// -- Matches --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposeRequest {
    /// Defaults to the caller.
    pub party_a: Option<Fid>,
    pub party_b: Fid,
    pub message: String,
}

/// A match enriched with participant display data.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    #[serde(flatten)]
    pub record: Match,
    pub party_a_card: ParticipantCard,
    pub party_b_card: ParticipantCard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownStatus {
    pub with: Fid,
    pub in_cooldown: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

// -- Suggestions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SuggestRequest {
    pub party_a: Fid,
    pub party_b: Fid,
    pub message: String,
}

// -- Rooms --

#[derive(Debug, Clone, Serialize)]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    pub state: RoomState,
    pub remaining_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForceCloseRequest {
    pub note: Option<String>,
}

// -- Operations --

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub rooms_closed: usize,
    pub matches_expired: usize,
}

// -- Errors --

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<Uuid>,
}
