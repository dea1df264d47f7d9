use accord_db::matches as match_q;
use accord_db::suggestions as q;
use accord_types::Outcome;
use accord_types::events::LifecycleEvent;
use accord_types::models::{
    Fid, Match, MatchOrigin, MatchStatus, ParticipantSuggestion, Side, Suggestion,
    SuggestionStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Engine;
use crate::cooldown;
use crate::error::{LifecycleError, Result};
use crate::matches::{ensure_pair_available, validate_intro};
use crate::rooms;

/// Third-party introductions. A suggester names two participants; when both
/// accept, the suggestion materializes into an accepted match with its room.
///
/// Participants only ever receive [`ParticipantSuggestion`], which has no
/// suggester field. The full record goes back to the suggester alone.
pub struct SuggestionRegistry<'a> {
    engine: &'a Engine,
}

impl<'a> SuggestionRegistry<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub fn create(
        &self,
        suggester: Fid,
        party_a: Fid,
        party_b: Fid,
        message: &str,
    ) -> Result<Suggestion> {
        if party_a == party_b {
            return Err(LifecycleError::Validation(
                "a participant cannot be introduced to themselves".into(),
            ));
        }
        if suggester == party_a || suggester == party_b {
            return Err(LifecycleError::Validation(
                "suggest a match for two other people, or propose directly".into(),
            ));
        }
        let message = validate_intro(self.engine, message)?;

        let now = self.engine.now();
        let record = Suggestion {
            id: Uuid::new_v4(),
            suggester,
            party_a,
            party_b,
            message,
            status: SuggestionStatus::Proposed,
            a_accepted: false,
            b_accepted: false,
            match_id: None,
            conversation_room_id: None,
            created_at: now,
            updated_at: now,
        };

        self.engine.db().with_tx(|conn| -> Result<()> {
            ensure_pair_available(conn, record.pair(), now)?;
            if !q::insert(conn, &record)? {
                return Err(LifecycleError::Conflict(format!(
                    "an open suggestion for {} and {} already exists",
                    party_a, party_b
                )));
            }
            Ok(())
        })?;

        info!("Suggestion {} created for {} and {}", record.id, party_a, party_b);
        self.engine.notify(LifecycleEvent::SuggestionCreated {
            suggestion_id: record.id,
            party_a,
            party_b,
        });
        Ok(record)
    }

    /// Record a participant's acceptance. The second acceptance creates the
    /// match (already accepted by both) and its room in the same write.
    pub fn accept(&self, suggestion_id: Uuid, actor: Fid) -> Result<Outcome<ParticipantSuggestion>> {
        let current = self.load(suggestion_id)?;
        let side = current
            .side_of(actor)
            .ok_or(LifecycleError::Forbidden("only a participant can accept"))?;
        if current.status.is_terminal() {
            return Ok(already_terminal(current));
        }

        let already = match side {
            Side::A => current.a_accepted,
            Side::B => current.b_accepted,
        };
        if already {
            return Ok(Outcome::Unchanged {
                record: current.into_participant_view(),
            });
        }

        let now = self.engine.now();
        let ttl = self.engine.config().room_ttl_seconds;
        let written = self.engine.db().with_tx(|conn| -> Result<Option<(Uuid, Uuid)>> {
            if q::accept_side(conn, suggestion_id, side, now)? == 0 {
                return Err(LifecycleError::ConcurrentModification);
            }
            let after = q::get(conn, suggestion_id)?
                .ok_or_else(|| LifecycleError::not_found("suggestion", suggestion_id))?;
            if after.status != SuggestionStatus::Accepted {
                return Ok(None);
            }
            materialize(conn, &after, ttl, now).map(Some)
        });

        let fulfilled = match written {
            Ok(fulfilled) => fulfilled,
            Err(LifecycleError::ConcurrentModification) => {
                let now = self.load(suggestion_id)?;
                if now.status.is_terminal() {
                    return Ok(already_terminal(now));
                }
                let applied = match side {
                    Side::A => now.a_accepted,
                    Side::B => now.b_accepted,
                };
                if applied {
                    return Ok(Outcome::Unchanged {
                        record: now.into_participant_view(),
                    });
                }
                return Err(LifecycleError::ConcurrentModification);
            }
            Err(e) => return Err(e),
        };

        info!("Suggestion {} accepted by {}", suggestion_id, actor);
        if let Some((match_id, room_id)) = fulfilled {
            info!(
                "Suggestion {} fulfilled: match {} room {}",
                suggestion_id, match_id, room_id
            );
            self.engine.notify(LifecycleEvent::SuggestionAccepted {
                suggestion_id,
                match_id,
                room_id,
                party_a: current.party_a,
                party_b: current.party_b,
            });
        }
        Ok(Outcome::Changed {
            record: self.load(suggestion_id)?.into_participant_view(),
        })
    }

    /// Either participant declines for both. Starts the same pairwise cooldown
    /// a declined match does.
    pub fn decline(&self, suggestion_id: Uuid, actor: Fid) -> Result<Outcome<ParticipantSuggestion>> {
        let current = self.load(suggestion_id)?;
        if current.side_of(actor).is_none() {
            return Err(LifecycleError::Forbidden("only a participant can decline"));
        }
        if current.status.is_terminal() {
            return Ok(already_terminal(current));
        }

        let now = self.engine.now();
        let window = self.engine.config().cooldown_window;
        let declined = self.engine.db().with_tx(|conn| -> Result<bool> {
            if q::close(conn, suggestion_id, SuggestionStatus::Declined, now)? == 0 {
                return Ok(false);
            }
            cooldown::trigger_within(conn, current.pair(), now, window)?;
            Ok(true)
        })?;

        let updated = self.load(suggestion_id)?;
        if !declined {
            if updated.status.is_terminal() {
                return Ok(already_terminal(updated));
            }
            return Err(LifecycleError::ConcurrentModification);
        }

        info!("Suggestion {} declined by {}", suggestion_id, actor);
        self.engine.notify(LifecycleEvent::SuggestionDeclined {
            suggestion_id,
            party_a: current.party_a,
            party_b: current.party_b,
        });
        Ok(Outcome::Changed {
            record: updated.into_participant_view(),
        })
    }

    /// The suggester retracts an open suggestion. No cooldown.
    pub fn withdraw(&self, suggestion_id: Uuid, actor: Fid) -> Result<Outcome<Suggestion>> {
        let current = self.load(suggestion_id)?;
        if current.suggester != actor {
            return Err(LifecycleError::Forbidden("only the suggester can withdraw"));
        }
        if current.status.is_terminal() {
            return Ok(Outcome::AlreadyTerminal {
                status: current.status.to_string(),
                record: current,
            });
        }

        let now = self.engine.now();
        let n = self.engine.db().with_conn_mut(|conn| {
            q::close(conn, suggestion_id, SuggestionStatus::Withdrawn, now)
        })?;
        let updated = self.load(suggestion_id)?;
        if n == 0 {
            if updated.status.is_terminal() {
                return Ok(Outcome::AlreadyTerminal {
                    status: updated.status.to_string(),
                    record: updated,
                });
            }
            return Err(LifecycleError::ConcurrentModification);
        }

        info!("Suggestion {} withdrawn", suggestion_id);
        Ok(Outcome::Changed { record: updated })
    }

    pub fn view_for_participant(&self, suggestion_id: Uuid, viewer: Fid) -> Result<ParticipantSuggestion> {
        let record = self.load(suggestion_id)?;
        if record.side_of(viewer).is_none() {
            return Err(LifecycleError::Forbidden("not a participant of this suggestion"));
        }
        Ok(record.into_participant_view())
    }

    pub fn view_for_suggester(&self, suggestion_id: Uuid, viewer: Fid) -> Result<Suggestion> {
        let record = self.load(suggestion_id)?;
        if record.suggester != viewer {
            return Err(LifecycleError::Forbidden("not the suggester"));
        }
        Ok(record)
    }

    pub fn list_for_participant(&self, fid: Fid, limit: u32) -> Result<Vec<ParticipantSuggestion>> {
        let rows = self
            .engine
            .db()
            .with_conn(|conn| q::list_for_participant(conn, fid, limit.min(200)))?;
        Ok(rows.into_iter().map(Suggestion::into_participant_view).collect())
    }

    pub fn list_by_suggester(&self, fid: Fid, limit: u32) -> Result<Vec<Suggestion>> {
        let rows = self
            .engine
            .db()
            .with_conn(|conn| q::list_by_suggester(conn, fid, limit.min(200)))?;
        Ok(rows)
    }

    fn load(&self, suggestion_id: Uuid) -> Result<Suggestion> {
        self.engine
            .db()
            .with_conn(|conn| q::get(conn, suggestion_id))?
            .ok_or_else(|| LifecycleError::not_found("suggestion", suggestion_id))
    }
}

/// Create the accepted match and its room for a suggestion both participants
/// accepted, then record them on the suggestion. Runs inside the acceptance
/// write, so any failure here undoes the acceptance too.
fn materialize(
    conn: &Connection,
    suggestion: &Suggestion,
    ttl_seconds: i64,
    now: DateTime<Utc>,
) -> Result<(Uuid, Uuid)> {
    ensure_pair_available(conn, suggestion.pair(), now)?;

    let record = Match {
        id: Uuid::new_v4(),
        party_a: suggestion.party_a,
        party_b: suggestion.party_b,
        created_by: suggestion.party_a,
        message: suggestion.message.clone(),
        status: MatchStatus::Accepted,
        a_accepted: true,
        b_accepted: true,
        origin: MatchOrigin::Suggestion,
        suggestion_id: Some(suggestion.id),
        room_id: None,
        created_at: now,
        updated_at: now,
    };
    match_q::insert(conn, &record)?;
    let (room, _) = rooms::open_within(
        conn,
        record.id,
        record.party_a,
        record.party_b,
        ttl_seconds,
        now,
    )?;

    if q::set_fulfilled(conn, suggestion.id, record.id, room.id)? == 0 {
        return Err(LifecycleError::ConcurrentModification);
    }
    Ok((record.id, room.id))
}

fn already_terminal(record: Suggestion) -> Outcome<ParticipantSuggestion> {
    debug!("Suggestion {} already {}", record.id, record.status);
    Outcome::AlreadyTerminal {
        status: record.status.to_string(),
        record: record.into_participant_view(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{INTRO, harness};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn mutual_acceptance_materializes_one_match_and_room_without_leaking_suggester() {
        let h = harness();
        let s = h.engine.suggestions().create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();

        let first = h.engine.suggestions().accept(s.id, Fid(200)).unwrap();
        assert_eq!(first.record().status, SuggestionStatus::AcceptedByB);
        assert_eq!(first.record().conversation_room_id, None);

        let second = h.engine.suggestions().accept(s.id, Fid(100)).unwrap().into_record();
        assert_eq!(second.status, SuggestionStatus::Accepted);
        let match_id = second.match_id.unwrap();
        let room_id = second.conversation_room_id.unwrap();

        let view = h.engine.matches().get(match_id, Fid(100)).unwrap();
        assert_eq!(view.record.status, MatchStatus::Accepted);
        assert_eq!(view.record.origin, MatchOrigin::Suggestion);
        assert_eq!(view.record.suggestion_id, Some(s.id));
        assert_eq!(view.record.room_id, Some(room_id));

        let (matches, rooms): (i64, i64) = h
            .engine
            .db()
            .with_conn(|c| {
                c.query_row(
                    "SELECT (SELECT COUNT(*) FROM matches), (SELECT COUNT(*) FROM rooms)",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!((matches, rooms), (1, 1));

        // Every participant read path
        for fid in [Fid(100), Fid(200)] {
            let single = h.engine.suggestions().view_for_participant(s.id, fid).unwrap();
            let listed = h.engine.suggestions().list_for_participant(fid, 20).unwrap();
            for json in [
                serde_json::to_value(&single).unwrap(),
                serde_json::to_value(&listed[0]).unwrap(),
            ] {
                let obj = json.as_object().unwrap();
                assert!(!obj.contains_key("suggester"));
                assert!(obj.values().all(|v| v != &serde_json::json!(300)));
            }
        }
        let again = h.engine.suggestions().accept(s.id, Fid(200)).unwrap();
        let json = serde_json::to_value(&again).unwrap();
        assert!(json.get("suggester").is_none());
        assert!(json["record"].get("suggester").is_none());

        // The suggester keeps the full record
        let full = h.engine.suggestions().view_for_suggester(s.id, Fid(300)).unwrap();
        assert_eq!(full.suggester, Fid(300));
        assert!(matches!(
            h.engine.suggestions().view_for_participant(s.id, Fid(300)),
            Err(LifecycleError::Forbidden(_))
        ));
    }

    #[test]
    fn duplicate_open_suggestion_for_the_same_pair_conflicts() {
        let h = harness();
        let reg = h.engine.suggestions();
        reg.create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();
        assert!(matches!(
            reg.create(Fid(400), Fid(100), Fid(200), INTRO),
            Err(LifecycleError::Conflict(_))
        ));
    }

    #[test]
    fn suggester_cannot_be_a_participant() {
        let h = harness();
        assert!(matches!(
            h.engine.suggestions().create(Fid(100), Fid(100), Fid(200), INTRO),
            Err(LifecycleError::Validation(_))
        ));
    }

    #[test]
    fn decline_blocks_direct_proposals_through_the_shared_cooldown() {
        let h = harness();
        let s = h.engine.suggestions().create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();

        let out = h.engine.suggestions().decline(s.id, Fid(100)).unwrap();
        assert_eq!(out.record().status, SuggestionStatus::Declined);
        assert!(h.engine.suggestions().decline(s.id, Fid(200)).unwrap().is_already_terminal());

        assert!(matches!(
            h.engine.matches().propose(Fid(200), Fid(200), Fid(100), INTRO),
            Err(LifecycleError::CooldownActive { .. })
        ));
        assert!(matches!(
            h.engine.suggestions().create(Fid(400), Fid(200), Fid(100), INTRO),
            Err(LifecycleError::CooldownActive { .. })
        ));
    }

    #[test]
    fn withdraw_is_suggester_only_and_frees_the_pair() {
        let h = harness();
        let s = h.engine.suggestions().create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();

        assert!(matches!(
            h.engine.suggestions().withdraw(s.id, Fid(100)),
            Err(LifecycleError::Forbidden(_))
        ));
        let out = h.engine.suggestions().withdraw(s.id, Fid(300)).unwrap();
        assert_eq!(out.record().status, SuggestionStatus::Withdrawn);
        assert!(!h.engine.cooldowns().is_in_cooldown(s.pair()).unwrap());

        h.engine.suggestions().create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();
        assert_eq!(h.engine.suggestions().list_by_suggester(Fid(300), 10).unwrap().len(), 2);
    }

    #[test]
    fn concurrent_acceptances_produce_a_single_match() {
        let h = harness();
        let s = h.engine.suggestions().create(Fid(300), Fid(100), Fid(200), INTRO).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [Fid(100), Fid(200)]
            .into_iter()
            .map(|actor| {
                let engine = h.engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.suggestions().accept(s.id, actor)
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().unwrap().is_changed());
        }

        let s = h.engine.suggestions().view_for_suggester(s.id, Fid(300)).unwrap();
        assert_eq!(s.status, SuggestionStatus::Accepted);
        let count: i64 = h
            .engine
            .db()
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM matches", [], |r| r.get(0))
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
