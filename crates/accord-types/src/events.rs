use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CloseReason, Fid};

/// Lifecycle signals handed to the notification dispatcher.
///
/// Suggestion events never carry the suggester: they are delivered to the
/// participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    ProposalCreated {
        match_id: Uuid,
        created_by: Fid,
        party_a: Fid,
        party_b: Fid,
    },

    /// A `pending_external` proposal became a regular one after registration
    ProposalActivated { match_id: Uuid, party_a: Fid, party_b: Fid },

    MatchAccepted {
        match_id: Uuid,
        room_id: Uuid,
        party_a: Fid,
        party_b: Fid,
    },

    MatchDeclined {
        match_id: Uuid,
        declined_by: Fid,
        party_a: Fid,
        party_b: Fid,
    },

    MatchCancelled { match_id: Uuid, party_a: Fid, party_b: Fid },

    SuggestionCreated {
        suggestion_id: Uuid,
        party_a: Fid,
        party_b: Fid,
    },

    SuggestionAccepted {
        suggestion_id: Uuid,
        match_id: Uuid,
        room_id: Uuid,
        party_a: Fid,
        party_b: Fid,
    },

    SuggestionDeclined {
        suggestion_id: Uuid,
        party_a: Fid,
        party_b: Fid,
    },

    MessageSent {
        room_id: Uuid,
        message_id: Uuid,
        sender: Fid,
        recipient: Fid,
    },

    RoomClosed {
        room_id: Uuid,
        reason: CloseReason,
        party_a: Fid,
        party_b: Fid,
    },

    AchievementAwarded { fid: Fid, code: String, points: i64 },
}

impl LifecycleEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProposalCreated { .. } => "proposal.created",
            Self::ProposalActivated { .. } => "proposal.activated",
            Self::MatchAccepted { .. } => "match.accepted",
            Self::MatchDeclined { .. } => "match.declined",
            Self::MatchCancelled { .. } => "match.cancelled",
            Self::SuggestionCreated { .. } => "suggestion.created",
            Self::SuggestionAccepted { .. } => "suggestion.accepted",
            Self::SuggestionDeclined { .. } => "suggestion.declined",
            Self::MessageSent { .. } => "message.sent",
            Self::RoomClosed { .. } => "room.closed",
            Self::AchievementAwarded { .. } => "achievement.awarded",
        }
    }

    /// Identities the event should be delivered to.
    pub fn recipients(&self) -> Vec<Fid> {
        match self {
            Self::ProposalCreated {
                created_by,
                party_a,
                party_b,
                ..
            } => [*party_a, *party_b]
                .into_iter()
                .filter(|fid| fid != created_by)
                .collect(),
            Self::MatchDeclined {
                declined_by,
                party_a,
                party_b,
                ..
            } => [*party_a, *party_b]
                .into_iter()
                .filter(|fid| fid != declined_by)
                .collect(),
            Self::ProposalActivated { party_a, party_b, .. }
            | Self::MatchAccepted { party_a, party_b, .. }
            | Self::MatchCancelled { party_a, party_b, .. }
            | Self::SuggestionCreated { party_a, party_b, .. }
            | Self::SuggestionAccepted { party_a, party_b, .. }
            | Self::SuggestionDeclined { party_a, party_b, .. }
            | Self::RoomClosed { party_a, party_b, .. } => vec![*party_a, *party_b],
            Self::MessageSent { recipient, .. } => vec![*recipient],
            Self::AchievementAwarded { fid, .. } => vec![*fid],
        }
    }
}
