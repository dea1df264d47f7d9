use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable participant identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fid(pub i64);

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unordered pair of participants. Always stored smaller id first, so
/// `PairKey::new(a, b) == PairKey::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PairKey {
    low: Fid,
    high: Fid,
}

impl PairKey {
    pub fn new(a: Fid, b: Fid) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn low(&self) -> Fid {
        self.low
    }

    pub fn high(&self) -> Fid {
        self.high
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.low, self.high)
    }
}

/// Which seat of a two-party record an identity occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError(pub String);

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status '{}'", self.0)
    }
}

impl std::error::Error for ParseStatusError {}

// -- Matches --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Counterpart is not registered yet; becomes `Proposed` once they are.
    PendingExternal,
    Proposed,
    AcceptedByA,
    AcceptedByB,
    Accepted,
    Declined,
    Cancelled,
    Expired,
    Completed,
}

impl MatchStatus {
    /// Statuses a bilateral decline may move out of.
    pub const DECLINABLE: [MatchStatus; 3] = [
        MatchStatus::Proposed,
        MatchStatus::AcceptedByA,
        MatchStatus::AcceptedByB,
    ];

    /// Statuses that still occupy the pair (block a second proposal).
    pub const ACTIVE: [MatchStatus; 5] = [
        MatchStatus::PendingExternal,
        MatchStatus::Proposed,
        MatchStatus::AcceptedByA,
        MatchStatus::AcceptedByB,
        MatchStatus::Accepted,
    ];

    /// Statuses still waiting on at least one party's answer.
    pub const AWAITING: [MatchStatus; 4] = [
        MatchStatus::PendingExternal,
        MatchStatus::Proposed,
        MatchStatus::AcceptedByA,
        MatchStatus::AcceptedByB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingExternal => "pending_external",
            Self::Proposed => "proposed",
            Self::AcceptedByA => "accepted_by_a",
            Self::AcceptedByB => "accepted_by_b",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Declined | Self::Cancelled | Self::Expired | Self::Completed
        )
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_external" => Ok(Self::PendingExternal),
            // Legacy alias for the initial state.
            "proposed" | "pending" => Ok(Self::Proposed),
            "accepted_by_a" => Ok(Self::AcceptedByA),
            "accepted_by_b" => Ok(Self::AcceptedByB),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "completed" => Ok(Self::Completed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// How a match came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    Direct,
    Suggestion,
}

impl MatchOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Suggestion => "suggestion",
        }
    }
}

impl FromStr for MatchOrigin {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "suggestion" => Ok(Self::Suggestion),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub party_a: Fid,
    pub party_b: Fid,
    pub created_by: Fid,
    pub message: String,
    pub status: MatchStatus,
    pub a_accepted: bool,
    pub b_accepted: bool,
    pub origin: MatchOrigin,
    /// Suggestion this match was materialized from, if any.
    pub suggestion_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn side_of(&self, fid: Fid) -> Option<Side> {
        side_of(self.party_a, self.party_b, fid)
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.party_a, self.party_b)
    }
}

// -- Suggestions --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Proposed,
    AcceptedByA,
    AcceptedByB,
    Accepted,
    Declined,
    Withdrawn,
}

impl SuggestionStatus {
    pub const OPEN: [SuggestionStatus; 3] = [
        SuggestionStatus::Proposed,
        SuggestionStatus::AcceptedByA,
        SuggestionStatus::AcceptedByB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::AcceptedByA => "accepted_by_a",
            Self::AcceptedByB => "accepted_by_b",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Accepted is terminal for a suggestion: the match takes over from there.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Declined | Self::Withdrawn)
    }
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuggestionStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" | "pending" => Ok(Self::Proposed),
            "accepted_by_a" => Ok(Self::AcceptedByA),
            "accepted_by_b" => Ok(Self::AcceptedByB),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Full suggestion record. Only ever handed back to the suggester; participants
/// get a [`ParticipantSuggestion`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub suggester: Fid,
    pub party_a: Fid,
    pub party_b: Fid,
    pub message: String,
    pub status: SuggestionStatus,
    pub a_accepted: bool,
    pub b_accepted: bool,
    pub match_id: Option<Uuid>,
    pub conversation_room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Suggestion {
    pub fn side_of(&self, fid: Fid) -> Option<Side> {
        side_of(self.party_a, self.party_b, fid)
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.party_a, self.party_b)
    }

    pub fn into_participant_view(self) -> ParticipantSuggestion {
        ParticipantSuggestion {
            id: self.id,
            party_a: self.party_a,
            party_b: self.party_b,
            message: self.message,
            status: self.status,
            a_accepted: self.a_accepted,
            b_accepted: self.b_accepted,
            match_id: self.match_id,
            conversation_room_id: self.conversation_room_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// What a participant may see of a suggestion. There is no suggester field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSuggestion {
    pub id: Uuid,
    pub party_a: Fid,
    pub party_b: Fid,
    pub message: String,
    pub status: SuggestionStatus,
    pub a_accepted: bool,
    pub b_accepted: bool,
    pub match_id: Option<Uuid>,
    pub conversation_room_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Conversation rooms --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Both participants marked the meeting complete.
    Completed,
    /// A participant closed the room.
    Manual,
    Operator,
    Expired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Manual => "manual",
            Self::Operator => "operator",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for CloseReason {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "manual" => Ok(Self::Manual),
            "operator" => Ok(Self::Operator),
            "expired" => Ok(Self::Expired),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomState {
    /// Open, nobody has joined yet; the clock is not running.
    Unanchored,
    Counting,
    /// TTL ran out but the sweep has not closed it yet.
    Expired,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub match_id: Uuid,
    pub party_a: Fid,
    pub party_b: Fid,
    pub first_join_at: Option<DateTime<Utc>>,
    pub ttl_seconds: i64,
    pub a_completed: bool,
    pub b_completed: bool,
    pub is_closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    /// `None` on a closed room means nobody in particular: both completed,
    /// or the sweep expired it.
    pub closed_by: Option<Fid>,
    pub close_reason: Option<CloseReason>,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn side_of(&self, fid: Fid) -> Option<Side> {
        side_of(self.party_a, self.party_b, fid)
    }

    /// `None` until someone has joined. Can go negative once the TTL is spent.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.first_join_at
            .map(|joined| self.ttl_seconds - (now.timestamp() - joined.timestamp()))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.remaining_seconds(now).is_some_and(|left| left <= 0)
    }

    pub fn state(&self, now: DateTime<Utc>) -> RoomState {
        if self.is_closed {
            RoomState::Closed
        } else if self.first_join_at.is_none() {
            RoomState::Unanchored
        } else if self.is_expired(now) {
            RoomState::Expired
        } else {
            RoomState::Counting
        }
    }

    pub fn completed_by(&self, side: Side) -> bool {
        match side {
            Side::A => self.a_completed,
            Side::B => self.b_completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    /// `None` for engine-injected system messages.
    pub sender: Option<Fid>,
    pub content: String,
    pub is_system_message: bool,
    pub created_at: DateTime<Utc>,
}

// -- Achievements --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementRecord {
    pub fid: Fid,
    pub code: String,
    pub points: i64,
    pub awarded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementStatus {
    pub code: String,
    pub wave: u8,
    pub points: i64,
    pub earned: bool,
    /// Hidden achievements belong to a wave that is not unlocked yet.
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub fid: Fid,
    pub points_total: i64,
    pub level: i64,
    pub unlocked_wave: u8,
    pub achievements: Vec<AchievementStatus>,
}

// -- Directory --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub fid: Fid,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

impl UserProfile {
    pub fn is_complete(&self) -> bool {
        [&self.display_name, &self.avatar_url, &self.bio]
            .iter()
            .all(|field| field.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// Display data attached to a participant in read responses. Falls back to
/// just the fid when the directory has nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantCard {
    pub fid: Fid,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ParticipantCard {
    pub fn unknown(fid: Fid) -> Self {
        Self {
            fid,
            username: None,
            display_name: None,
            avatar_url: None,
        }
    }
}

impl From<UserProfile> for ParticipantCard {
    fn from(p: UserProfile) -> Self {
        Self {
            fid: p.fid,
            username: Some(p.username),
            display_name: p.display_name,
            avatar_url: p.avatar_url,
        }
    }
}

fn side_of(party_a: Fid, party_b: Fid, fid: Fid) -> Option<Side> {
    if fid == party_a {
        Some(Side::A)
    } else if fid == party_b {
        Some(Side::B)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pair_key_is_order_independent() {
        let k1 = PairKey::new(Fid(200), Fid(100));
        let k2 = PairKey::new(Fid(100), Fid(200));
        assert_eq!(k1, k2);
        assert_eq!(k1.low(), Fid(100));
        assert_eq!(k1.high(), Fid(200));
    }

    #[test]
    fn pending_is_an_alias_for_proposed() {
        assert_eq!("pending".parse::<MatchStatus>(), Ok(MatchStatus::Proposed));
        assert_eq!(MatchStatus::Proposed.as_str(), "proposed");
        assert!("bogus".parse::<MatchStatus>().is_err());
    }

    #[test]
    fn room_countdown_starts_at_first_join() {
        let created = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut room = Room {
            id: Uuid::new_v4(),
            match_id: Uuid::new_v4(),
            party_a: Fid(1),
            party_b: Fid(2),
            first_join_at: None,
            ttl_seconds: 7200,
            a_completed: false,
            b_completed: false,
            is_closed: false,
            closed_at: None,
            closed_by: None,
            close_reason: None,
            created_at: created,
        };
        let later = created + chrono::Duration::hours(5);
        assert_eq!(room.remaining_seconds(later), None);
        assert_eq!(room.state(later), RoomState::Unanchored);

        room.first_join_at = Some(later);
        assert_eq!(room.remaining_seconds(later), Some(7200));
        assert_eq!(
            room.state(later + chrono::Duration::seconds(7200)),
            RoomState::Expired
        );
    }

    #[test]
    fn profile_completeness_requires_every_field() {
        let mut p = UserProfile {
            fid: Fid(7),
            username: "seven".into(),
            display_name: Some("Seven".into()),
            avatar_url: Some("https://img/7.png".into()),
            bio: Some("  ".into()),
        };
        assert!(!p.is_complete());
        p.bio = Some("hello".into());
        assert!(p.is_complete());
    }
}
