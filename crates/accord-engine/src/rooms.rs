use accord_db::matches as match_q;
use accord_db::rooms as q;
use accord_types::Outcome;
use accord_types::api::RoomView;
use accord_types::events::LifecycleEvent;
use accord_types::models::{CloseReason, Fid, MatchStatus, Message, Room};
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Engine;
use crate::directory;
use crate::error::{LifecycleError, Result};

/// Conversation rooms opened on mutual acceptance.
///
/// A room's clock starts at the first join, not at creation. Remaining time is
/// always derived from `first_join_at`; nothing counts down in storage.
/// Closed is terminal.
pub struct RoomManager<'a> {
    engine: &'a Engine,
}

impl<'a> RoomManager<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Open the room for an accepted match, or return the one it already has.
    pub fn open(&self, match_id: Uuid, party_a: Fid, party_b: Fid) -> Result<Room> {
        let m = self
            .engine
            .db()
            .with_conn(|conn| match_q::get(conn, match_id))?
            .ok_or_else(|| LifecycleError::not_found("match", match_id))?;
        if (m.party_a, m.party_b) != (party_a, party_b) {
            return Err(LifecycleError::Validation(format!(
                "match {} is between {} and {}",
                match_id, m.party_a, m.party_b
            )));
        }
        if m.status != MatchStatus::Accepted && m.room_id.is_none() {
            return Err(LifecycleError::InvalidStateTransition {
                entity: "match",
                action: "open a room for",
                status: m.status.to_string(),
            });
        }

        let now = self.engine.now();
        let ttl = self.engine.config().room_ttl_seconds;
        let (room, _) = self
            .engine
            .db()
            .with_tx(|conn| open_within(conn, match_id, party_a, party_b, ttl, now))?;
        Ok(room)
    }

    /// Anchor the TTL at now if nobody has joined yet.
    pub fn touch_first_join(&self, room_id: Uuid) -> Result<Room> {
        let now = self.engine.now();
        let anchored = self
            .engine
            .db()
            .with_conn_mut(|conn| q::anchor(conn, room_id, now))?;
        if anchored == 1 {
            info!("Room {} anchored at {}", room_id, now);
        }
        self.load(room_id)
    }

    /// A participant enters the room. The first entry starts the clock.
    pub fn join(&self, room_id: Uuid, actor: Fid) -> Result<RoomView> {
        let room = self.load(room_id)?;
        authorize(&room, actor)?;
        let room = if room.first_join_at.is_none() && !room.is_closed {
            self.touch_first_join(room_id)?
        } else {
            room
        };
        Ok(self.view(room))
    }

    /// Read without touching the anchor.
    pub fn get(&self, room_id: Uuid, viewer: Fid) -> Result<RoomView> {
        let room = self.load(room_id)?;
        authorize(&room, viewer)?;
        Ok(self.view(room))
    }

    pub fn send_message(&self, room_id: Uuid, sender: Fid, content: &str) -> Result<Message> {
        let max = self.engine.config().message_max_chars;
        if content.trim().is_empty() {
            return Err(LifecycleError::Validation("message is empty".into()));
        }
        if content.chars().count() > max {
            return Err(LifecycleError::Validation(format!(
                "message exceeds {} characters",
                max
            )));
        }

        let room = self.load(room_id)?;
        authorize(&room, sender)?;
        let now = self.engine.now();
        if let Some(e) = unavailable(&room, now) {
            return Err(e);
        }

        let msg = Message {
            id: Uuid::new_v4(),
            room_id,
            sender: Some(sender),
            content: content.to_string(),
            is_system_message: false,
            created_at: now,
        };
        self.engine.db().with_tx(|conn| -> Result<()> {
            q::anchor(conn, room_id, now)?;
            if q::insert_message_if_open(conn, &msg, now)? == 0 {
                let current = q::get(conn, room_id)?
                    .ok_or_else(|| LifecycleError::not_found("room", room_id))?;
                return Err(unavailable(&current, now).unwrap_or(LifecycleError::ConcurrentModification));
            }
            Ok(())
        })?;

        let recipient = if sender == room.party_a {
            room.party_b
        } else {
            room.party_a
        };
        self.engine.notify(LifecycleEvent::MessageSent {
            room_id,
            message_id: msg.id,
            sender,
            recipient,
        });
        Ok(msg)
    }

    /// Newest first, `limit` capped at 200. Pass the id of the oldest message
    /// already seen as `before` to fetch the next page.
    pub fn list_messages(
        &self,
        room_id: Uuid,
        viewer: Fid,
        limit: u32,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>> {
        let room = self.load(room_id)?;
        authorize(&room, viewer)?;
        let limit = limit.clamp(1, 200);
        let messages = self
            .engine
            .db()
            .with_conn(|conn| q::list_messages(conn, room_id, limit, before))?;
        Ok(messages)
    }

    /// Mark the meeting complete for `actor`. Once both sides have, the room
    /// closes on behalf of both and the match completes.
    pub fn mark_completed(&self, room_id: Uuid, actor: Fid) -> Result<Outcome<RoomView>> {
        let room = self.load(room_id)?;
        let side = authorize(&room, actor)?;
        if room.is_closed {
            return Ok(self.already_closed(room));
        }
        if room.completed_by(side) {
            return Ok(Outcome::Unchanged {
                record: self.view(room),
            });
        }

        let note = format!(
            "{} marked the meeting as complete.",
            directory::display_name(self.engine.directory(), actor)
        );
        let now = self.engine.now();
        let written = self.engine.db().with_tx(|conn| -> Result<bool> {
            if q::set_completed(conn, room_id, side)? == 0 {
                return Err(LifecycleError::ConcurrentModification);
            }
            q::insert_message(conn, &system_message(room_id, note, now))?;
            if q::close_if_both_completed(conn, room_id, now)? == 0 {
                return Ok(false);
            }
            finish_match(conn, room.match_id, MatchStatus::Completed, now)?;
            Ok(true)
        });

        let closed = match written {
            Ok(closed) => closed,
            Err(LifecycleError::ConcurrentModification) => {
                let current = self.load(room_id)?;
                if current.is_closed {
                    return Ok(self.already_closed(current));
                }
                if current.completed_by(side) {
                    return Ok(Outcome::Unchanged {
                        record: self.view(current),
                    });
                }
                return Err(LifecycleError::ConcurrentModification);
            }
            Err(e) => return Err(e),
        };

        info!("Room {} marked complete by {}", room_id, actor);
        if closed {
            info!("Room {} closed, both participants completed", room_id);
            self.engine.notify(LifecycleEvent::RoomClosed {
                room_id,
                reason: CloseReason::Completed,
                party_a: room.party_a,
                party_b: room.party_b,
            });
            self.engine.after_meeting_completed([room.party_a, room.party_b]);
        }
        Ok(Outcome::Changed {
            record: self.view(self.load(room_id)?),
        })
    }

    /// Unilateral close by a participant. Closing twice is an error.
    pub fn close(&self, room_id: Uuid, actor: Fid) -> Result<RoomView> {
        let room = self.load(room_id)?;
        authorize(&room, actor)?;
        if room.is_closed {
            return Err(closed_error(&room));
        }

        let note = format!(
            "{} closed the conversation.",
            directory::display_name(self.engine.directory(), actor)
        );
        let now = self.engine.now();
        self.engine.db().with_tx(|conn| -> Result<()> {
            if q::close(conn, room_id, Some(actor), CloseReason::Manual, now)? == 0 {
                let current =
                    q::get(conn, room_id)?.ok_or_else(|| LifecycleError::not_found("room", room_id))?;
                return Err(closed_error(&current));
            }
            q::insert_message(conn, &system_message(room_id, note, now))?;
            finish_match(conn, room.match_id, MatchStatus::Completed, now)?;
            Ok(())
        })?;

        info!("Room {} closed by {}", room_id, actor);
        self.engine.notify(LifecycleEvent::RoomClosed {
            room_id,
            reason: CloseReason::Manual,
            party_a: room.party_a,
            party_b: room.party_b,
        });
        Ok(self.view(self.load(room_id)?))
    }

    /// Operator close. The underlying match is cancelled rather than completed.
    /// Authorization is the caller's job.
    pub fn force_close(&self, room_id: Uuid, note: Option<&str>) -> Result<Outcome<RoomView>> {
        let room = self.load(room_id)?;
        if room.is_closed {
            return Ok(self.already_closed(room));
        }

        let text = match note.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => format!("This conversation was closed by an operator: {}", n),
            None => "This conversation was closed by an operator.".to_string(),
        };
        let now = self.engine.now();
        let closed = self.engine.db().with_tx(|conn| -> Result<bool> {
            if q::close(conn, room_id, None, CloseReason::Operator, now)? == 0 {
                return Ok(false);
            }
            q::insert_message(conn, &system_message(room_id, text, now))?;
            finish_match(conn, room.match_id, MatchStatus::Cancelled, now)?;
            Ok(true)
        })?;
        if !closed {
            return Ok(self.already_closed(self.load(room_id)?));
        }

        info!("Room {} force-closed by an operator", room_id);
        self.engine.notify(LifecycleEvent::RoomClosed {
            room_id,
            reason: CloseReason::Operator,
            party_a: room.party_a,
            party_b: room.party_b,
        });
        Ok(Outcome::Changed {
            record: self.view(self.load(room_id)?),
        })
    }

    /// Close every anchored, open room whose time has run out at `now` and
    /// expire its match. Each close is guarded by the same predicate, so
    /// overlapping or repeated sweeps are harmless. Returns rooms closed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let ids = self.engine.db().with_conn(|conn| q::expired_ids(conn, now))?;

        let mut closed = 0;
        for room_id in ids {
            let swept = self.engine.db().with_tx(|conn| -> anyhow::Result<Option<Room>> {
                if q::close_expired(conn, room_id, now)? == 0 {
                    return Ok(None);
                }
                q::insert_message(
                    conn,
                    &system_message(room_id, "Time is up, this conversation has ended.".into(), now),
                )?;
                let room = q::get(conn, room_id)?
                    .ok_or_else(|| anyhow!("room {} vanished during sweep", room_id))?;
                finish_match(conn, room.match_id, MatchStatus::Expired, now)?;
                Ok(Some(room))
            })?;

            let Some(room) = swept else {
                debug!("Room {} already closed by another sweep", room_id);
                continue;
            };
            closed += 1;
            self.engine.notify(LifecycleEvent::RoomClosed {
                room_id,
                reason: CloseReason::Expired,
                party_a: room.party_a,
                party_b: room.party_b,
            });
        }

        if closed > 0 {
            info!("Sweep closed {} expired rooms", closed);
        }
        Ok(closed)
    }

    fn load(&self, room_id: Uuid) -> Result<Room> {
        self.engine
            .db()
            .with_conn(|conn| q::get(conn, room_id))?
            .ok_or_else(|| LifecycleError::not_found("room", room_id))
    }

    fn view(&self, room: Room) -> RoomView {
        let now = self.engine.now();
        RoomView {
            state: room.state(now),
            remaining_seconds: room.remaining_seconds(now).map(|left| left.max(0)),
            room,
        }
    }

    fn already_closed(&self, room: Room) -> Outcome<RoomView> {
        Outcome::AlreadyTerminal {
            status: "closed".into(),
            record: self.view(room),
        }
    }
}

/// Create the room for `match_id` unless it exists, inside the caller's write.
/// Returns the room and whether this call created it.
pub(crate) fn open_within(
    conn: &Connection,
    match_id: Uuid,
    party_a: Fid,
    party_b: Fid,
    ttl_seconds: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<(Room, bool)> {
    let room = Room {
        id: Uuid::new_v4(),
        match_id,
        party_a,
        party_b,
        first_join_at: None,
        ttl_seconds,
        a_completed: false,
        b_completed: false,
        is_closed: false,
        closed_at: None,
        closed_by: None,
        close_reason: None,
        created_at: now,
    };

    let created = q::insert_if_absent(conn, &room)?;
    if created {
        let minutes = ttl_seconds / 60;
        q::insert_message(
            conn,
            &system_message(
                room.id,
                format!("You're connected! You have {minutes} minutes from the moment one of you joins."),
                now,
            ),
        )?;
        info!("Opened room {} for match {}", room.id, match_id);
    }

    let room = q::get_by_match(conn, match_id)?
        .ok_or_else(|| anyhow!("room for match {} missing after insert", match_id))?;
    Ok((room, created))
}

fn system_message(room_id: Uuid, content: String, now: DateTime<Utc>) -> Message {
    Message {
        id: Uuid::new_v4(),
        room_id,
        sender: None,
        content,
        is_system_message: true,
        created_at: now,
    }
}

/// Move the room's match out of `accepted`. A match already past `accepted`
/// is left alone.
fn finish_match(
    conn: &Connection,
    match_id: Uuid,
    to: MatchStatus,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let n = match_q::transition(conn, match_id, &[MatchStatus::Accepted], to, false, now)?;
    if n == 1 {
        debug!("Match {} -> {}", match_id, to);
    }
    Ok(())
}

fn authorize(room: &Room, fid: Fid) -> Result<accord_types::models::Side> {
    room.side_of(fid)
        .ok_or(LifecycleError::Forbidden("not a participant of this room"))
}

/// Why nothing can be posted to `room` right now, if anything.
fn unavailable(room: &Room, now: DateTime<Utc>) -> Option<LifecycleError> {
    if room.is_closed {
        return Some(closed_error(room));
    }
    let joined = room.first_join_at?;
    if room.is_expired(now) {
        return Some(LifecycleError::RoomExpired {
            expired_at: joined + Duration::seconds(room.ttl_seconds),
        });
    }
    None
}

fn closed_error(room: &Room) -> LifecycleError {
    LifecycleError::RoomClosed {
        closed_at: room.closed_at,
        reason: room.close_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Harness, INTRO, harness};
    use accord_types::models::RoomState;

    fn accepted_room(h: &Harness, a: i64, b: i64) -> Room {
        let m = h.engine.matches().propose(Fid(a), Fid(a), Fid(b), INTRO).unwrap();
        h.engine.matches().accept(m.id, Fid(a)).unwrap();
        let accepted = h.engine.matches().accept(m.id, Fid(b)).unwrap().into_record();
        h.engine
            .db()
            .with_conn(|c| q::get_by_match(c, accepted.id))
            .unwrap()
            .unwrap()
    }

    fn match_status(h: &Harness, room: &Room) -> MatchStatus {
        h.engine.matches().get(room.match_id, room.party_a).unwrap().record.status
    }

    #[test]
    fn ttl_anchors_at_first_join_and_expiry_differs_from_close() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        assert_eq!(room.first_join_at, None);

        // Time passing before anyone joins does not count
        h.clock.advance(Duration::hours(5));
        let t = h.engine.now();
        let view = h.engine.rooms().join(room.id, Fid(100)).unwrap();
        assert_eq!(view.room.first_join_at, Some(t));
        assert_eq!(view.remaining_seconds, Some(room.ttl_seconds));
        assert_eq!(view.state, RoomState::Counting);

        // A later join keeps the original anchor
        h.clock.advance(Duration::minutes(10));
        let view = h.engine.rooms().join(room.id, Fid(200)).unwrap();
        assert_eq!(view.room.first_join_at, Some(t));
        assert_eq!(view.remaining_seconds, Some(room.ttl_seconds - 600));

        h.engine.rooms().send_message(room.id, Fid(200), "hello there").unwrap();

        h.clock.set(t + Duration::seconds(room.ttl_seconds + 1));
        match h.engine.rooms().send_message(room.id, Fid(100), "still here?") {
            Err(LifecycleError::RoomExpired { expired_at }) => {
                assert_eq!(expired_at, t + Duration::seconds(room.ttl_seconds));
            }
            other => panic!("expected expired, got {other:?}"),
        }

        h.engine.rooms().close(room.id, Fid(100)).unwrap();
        assert!(matches!(
            h.engine.rooms().send_message(room.id, Fid(100), "still here?"),
            Err(LifecycleError::RoomClosed { .. })
        ));
    }

    #[test]
    fn open_is_idempotent_per_match() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        let again = h.engine.rooms().open(room.match_id, Fid(100), Fid(200)).unwrap();
        assert_eq!(again.id, room.id);

        let count: i64 = h
            .engine
            .db()
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM rooms", [], |r| r.get(0))
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn open_requires_an_accepted_match() {
        let h = harness();
        let m = h.engine.matches().propose(Fid(100), Fid(100), Fid(200), INTRO).unwrap();
        assert!(matches!(
            h.engine.rooms().open(m.id, Fid(100), Fid(200)),
            Err(LifecycleError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn first_message_anchors_the_room_and_notifies_the_counterpart() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        let mut rx = h.dispatcher.subscribe();

        let msg = h.engine.rooms().send_message(room.id, Fid(200), "hi!").unwrap();
        assert_eq!(msg.sender, Some(Fid(200)));

        let room = h.engine.rooms().get(room.id, Fid(100)).unwrap().room;
        assert_eq!(room.first_join_at, Some(h.engine.now()));

        match rx.try_recv().unwrap() {
            LifecycleEvent::MessageSent { recipient, .. } => assert_eq!(recipient, Fid(100)),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn message_content_is_bounded_and_participants_only() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        let rooms = h.engine.rooms();

        assert!(matches!(
            rooms.send_message(room.id, Fid(100), "   "),
            Err(LifecycleError::Validation(_))
        ));
        assert!(matches!(
            rooms.send_message(room.id, Fid(100), &"a".repeat(2001)),
            Err(LifecycleError::Validation(_))
        ));
        rooms.send_message(room.id, Fid(100), &"a".repeat(2000)).unwrap();
        assert!(matches!(
            rooms.send_message(room.id, Fid(300), "let me in"),
            Err(LifecycleError::Forbidden(_))
        ));
        assert!(matches!(
            rooms.list_messages(room.id, Fid(300), 50, None),
            Err(LifecycleError::Forbidden(_))
        ));
    }

    #[test]
    fn paging_walks_messages_sent_within_the_same_second() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        let rooms = h.engine.rooms();
        for content in ["one", "two", "three"] {
            rooms.send_message(room.id, Fid(100), content).unwrap();
        }

        let page1 = rooms.list_messages(room.id, Fid(200), 2, None).unwrap();
        let texts: Vec<_> = page1.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, ["three", "two"]);

        let page2 = rooms
            .list_messages(room.id, Fid(200), 2, Some(page1[1].id))
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert_eq!(page2[0].content, "one");
        assert!(page2[1].is_system_message);

        let page3 = rooms
            .list_messages(room.id, Fid(200), 2, Some(page2[1].id))
            .unwrap();
        assert!(page3.is_empty());
    }

    #[test]
    fn both_completions_close_the_room_and_complete_the_match() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        h.engine.rooms().join(room.id, Fid(100)).unwrap();

        let first = h.engine.rooms().mark_completed(room.id, Fid(100)).unwrap();
        assert!(first.is_changed());
        assert!(!first.record().room.is_closed);

        let repeat = h.engine.rooms().mark_completed(room.id, Fid(100)).unwrap();
        assert!(matches!(repeat, Outcome::Unchanged { .. }));

        let second = h.engine.rooms().mark_completed(room.id, Fid(200)).unwrap();
        let closed = second.into_record().room;
        assert!(closed.is_closed);
        assert_eq!(closed.closed_by, None);
        assert_eq!(closed.close_reason, Some(CloseReason::Completed));
        assert_eq!(match_status(&h, &closed), MatchStatus::Completed);

        let after = h.engine.rooms().mark_completed(room.id, Fid(200)).unwrap();
        assert!(after.is_already_terminal());

        let progress = h.engine.achievements().progress(Fid(200)).unwrap();
        assert!(progress
            .achievements
            .iter()
            .any(|a| a.code == "completed_1" && a.earned));
    }

    #[test]
    fn manual_close_records_closer_and_cannot_repeat() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);

        let view = h.engine.rooms().close(room.id, Fid(200)).unwrap();
        assert_eq!(view.room.closed_by, Some(Fid(200)));
        assert_eq!(view.state, RoomState::Closed);
        assert_eq!(match_status(&h, &room), MatchStatus::Completed);

        assert!(matches!(
            h.engine.rooms().close(room.id, Fid(100)),
            Err(LifecycleError::RoomClosed { .. })
        ));

        let messages = h.engine.rooms().list_messages(room.id, Fid(100), 50, None).unwrap();
        assert!(messages[0].is_system_message);
        assert!(messages[0].content.contains("user200"));
    }

    #[test]
    fn operator_close_cancels_the_match() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);

        let out = h.engine.rooms().force_close(room.id, Some("reported")).unwrap();
        assert!(out.is_changed());
        assert_eq!(out.record().room.close_reason, Some(CloseReason::Operator));
        assert_eq!(match_status(&h, &room), MatchStatus::Cancelled);

        assert!(h.engine.rooms().force_close(room.id, None).unwrap().is_already_terminal());
    }

    #[test]
    fn sweep_closes_only_anchored_expired_rooms_once() {
        let h = harness();
        let expiring = accepted_room(&h, 100, 200);
        let idle = accepted_room(&h, 300, 400);

        h.engine.rooms().join(expiring.id, Fid(100)).unwrap();
        let later = h.engine.now() + Duration::seconds(expiring.ttl_seconds);

        assert_eq!(h.engine.rooms().sweep_expired(later).unwrap(), 1);
        assert_eq!(h.engine.rooms().sweep_expired(later).unwrap(), 0);

        let swept = h.engine.rooms().get(expiring.id, Fid(100)).unwrap();
        assert_eq!(swept.room.close_reason, Some(CloseReason::Expired));
        assert_eq!(swept.room.closed_by, None);
        assert_eq!(match_status(&h, &expiring), MatchStatus::Expired);

        let untouched = h.engine.rooms().get(idle.id, Fid(300)).unwrap();
        assert_eq!(untouched.state, RoomState::Unanchored);
    }

    #[test]
    fn completion_after_expiry_still_counts() {
        let h = harness();
        let room = accepted_room(&h, 100, 200);
        h.engine.rooms().join(room.id, Fid(100)).unwrap();
        h.clock.advance(Duration::seconds(room.ttl_seconds + 60));

        h.engine.rooms().mark_completed(room.id, Fid(100)).unwrap();
        let done = h.engine.rooms().mark_completed(room.id, Fid(200)).unwrap();
        assert_eq!(done.record().room.close_reason, Some(CloseReason::Completed));
    }
}
