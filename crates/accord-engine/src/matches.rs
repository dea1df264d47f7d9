use accord_db::matches as q;
use accord_types::Outcome;
use accord_types::api::MatchView;
use accord_types::events::LifecycleEvent;
use accord_types::models::{Fid, Match, MatchOrigin, MatchStatus, PairKey, Side};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::Engine;
use crate::cooldown;
use crate::directory;
use crate::error::{LifecycleError, Result};
use crate::rooms;

/// Owns match records and their state machine:
///
/// ```text
/// pending_external -> proposed -> accepted_by_a | accepted_by_b -> accepted -> completed
///                         \______________________/                   \-> expired
///                                    |-> declined (either party, bilateral, starts cooldown)
///                                    |-> cancelled (creator only, no cooldown)
///                                    |-> expired (left unanswered too long)
/// ```
pub struct MatchRegistry<'a> {
    engine: &'a Engine,
}

impl<'a> MatchRegistry<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Propose a match between `party_a` and `party_b` on behalf of `creator`,
    /// who must be one of the two. Third-party introductions go through
    /// suggestions instead.
    pub fn propose(
        &self,
        creator: Fid,
        party_a: Fid,
        party_b: Fid,
        message: &str,
    ) -> Result<Match> {
        if party_a == party_b {
            return Err(LifecycleError::Validation(
                "a participant cannot be matched with themselves".into(),
            ));
        }
        if creator != party_a && creator != party_b {
            return Err(LifecycleError::Forbidden(
                "only a participant can propose a match",
            ));
        }
        let message = validate_intro(self.engine, message)?;

        let counterpart = if creator == party_a { party_b } else { party_a };
        let status = if directory::is_registered(self.engine.directory(), counterpart) {
            MatchStatus::Proposed
        } else {
            MatchStatus::PendingExternal
        };

        let now = self.engine.now();
        let record = Match {
            id: Uuid::new_v4(),
            party_a,
            party_b,
            created_by: creator,
            message,
            status,
            a_accepted: false,
            b_accepted: false,
            origin: MatchOrigin::Direct,
            suggestion_id: None,
            room_id: None,
            created_at: now,
            updated_at: now,
        };

        let limit = self.engine.config().max_pending_proposals;
        self.engine.db().with_tx(|conn| -> Result<()> {
            ensure_pair_available(conn, record.pair(), now)?;
            for fid in [party_a, party_b] {
                if q::count_awaiting_for(conn, fid)? >= i64::from(limit) {
                    return Err(LifecycleError::PendingLimitReached { fid, limit });
                }
            }
            q::insert(conn, &record)?;
            Ok(())
        })?;

        info!(
            "Match {} proposed by {} between {} and {} ({})",
            record.id, creator, party_a, party_b, record.status
        );
        self.engine.notify(LifecycleEvent::ProposalCreated {
            match_id: record.id,
            created_by: creator,
            party_a,
            party_b,
        });
        self.engine.after_proposal_sent(creator);

        Ok(record)
    }

    /// Record `actor`'s acceptance. The second acceptance moves the match to
    /// `accepted` and opens its conversation room in the same write.
    pub fn accept(&self, match_id: Uuid, actor: Fid) -> Result<Outcome<Match>> {
        let current = self.load(match_id)?;
        let side = current
            .side_of(actor)
            .ok_or(LifecycleError::Forbidden("only a participant can accept"))?;

        if current.status.is_terminal() {
            return Ok(already_terminal(current));
        }
        match current.status {
            MatchStatus::PendingExternal => {
                return Err(invalid(&current, "accept"));
            }
            MatchStatus::Accepted => {
                debug!("Match {} already accepted, nothing to do", match_id);
                return Ok(Outcome::Unchanged { record: current });
            }
            _ => {}
        }

        let already = match side {
            Side::A => current.a_accepted,
            Side::B => current.b_accepted,
        };
        if already {
            return Ok(Outcome::Unchanged { record: current });
        }

        let now = self.engine.now();
        let ttl = self.engine.config().room_ttl_seconds;
        let written = self.engine.db().with_tx(|conn| -> Result<Option<Uuid>> {
            if q::accept_side(conn, match_id, side, now)? == 0 {
                return Err(LifecycleError::ConcurrentModification);
            }
            let after = q::get(conn, match_id)?
                .ok_or_else(|| LifecycleError::not_found("match", match_id))?;
            if after.status == MatchStatus::Accepted {
                let (room, _) =
                    rooms::open_within(conn, match_id, after.party_a, after.party_b, ttl, now)?;
                return Ok(Some(room.id));
            }
            Ok(None)
        });

        let room_id = match written {
            Ok(room_id) => room_id,
            Err(LifecycleError::ConcurrentModification) => {
                return self.resolve_lost_race(match_id, |m| match side {
                    Side::A => m.a_accepted,
                    Side::B => m.b_accepted,
                });
            }
            Err(e) => return Err(e),
        };

        let updated = self.load(match_id)?;
        info!("Match {} accepted by {} -> {}", match_id, actor, updated.status);
        if let Some(room_id) = room_id {
            self.engine.notify(LifecycleEvent::MatchAccepted {
                match_id,
                room_id,
                party_a: updated.party_a,
                party_b: updated.party_b,
            });
        }
        Ok(Outcome::Changed { record: updated })
    }

    /// Bilateral decline by either participant: the match is declined for
    /// both, flags are cleared and the pair goes into cooldown. Declining an
    /// already declined match is a no-op success.
    pub fn decline(&self, match_id: Uuid, actor: Fid) -> Result<Outcome<Match>> {
        let current = self.load(match_id)?;
        if current.side_of(actor).is_none() {
            return Err(LifecycleError::Forbidden("only a participant can decline"));
        }
        if current.status.is_terminal() {
            return Ok(already_terminal(current));
        }
        if !MatchStatus::DECLINABLE.contains(&current.status) {
            return Err(invalid(&current, "decline"));
        }

        let now = self.engine.now();
        let window = self.engine.config().cooldown_window;
        let written = self.engine.db().with_tx(|conn| -> Result<()> {
            let n = q::transition(
                conn,
                match_id,
                &MatchStatus::DECLINABLE,
                MatchStatus::Declined,
                true,
                now,
            )?;
            if n == 0 {
                return Err(LifecycleError::ConcurrentModification);
            }
            cooldown::trigger_within(conn, current.pair(), now, window)?;
            Ok(())
        });

        match written {
            Ok(()) => {}
            Err(LifecycleError::ConcurrentModification) => {
                return self.resolve_lost_race(match_id, |_| false);
            }
            Err(e) => return Err(e),
        }

        info!("Match {} declined by {}", match_id, actor);
        self.engine.notify(LifecycleEvent::MatchDeclined {
            match_id,
            declined_by: actor,
            party_a: current.party_a,
            party_b: current.party_b,
        });
        Ok(Outcome::Changed {
            record: self.load(match_id)?,
        })
    }

    /// Creator withdraws a proposal nobody has fully accepted. No cooldown.
    pub fn cancel(&self, match_id: Uuid, actor: Fid) -> Result<Outcome<Match>> {
        let current = self.load(match_id)?;
        if current.created_by != actor {
            return Err(LifecycleError::Forbidden("only the creator can cancel"));
        }
        if current.status.is_terminal() {
            return Ok(already_terminal(current));
        }
        if !MatchStatus::AWAITING.contains(&current.status) {
            return Err(invalid(&current, "cancel"));
        }

        let now = self.engine.now();
        let n = self.engine.db().with_conn_mut(|conn| {
            q::transition(
                conn,
                match_id,
                &MatchStatus::AWAITING,
                MatchStatus::Cancelled,
                true,
                now,
            )
        })?;
        if n == 0 {
            return self.resolve_lost_race(match_id, |_| false);
        }

        info!("Match {} cancelled by its creator {}", match_id, actor);
        self.engine.notify(LifecycleEvent::MatchCancelled {
            match_id,
            party_a: current.party_a,
            party_b: current.party_b,
        });
        Ok(Outcome::Changed {
            record: self.load(match_id)?,
        })
    }

    /// Read a match as `viewer` (a participant or the creator), enriched with
    /// participant display data.
    pub fn get(&self, match_id: Uuid, viewer: Fid) -> Result<MatchView> {
        let record = self.load(match_id)?;
        if record.side_of(viewer).is_none() && record.created_by != viewer {
            return Err(LifecycleError::Forbidden("not part of this match"));
        }
        Ok(self.enrich(record))
    }

    pub fn list_for(&self, fid: Fid, limit: u32) -> Result<Vec<MatchView>> {
        let rows = self
            .engine
            .db()
            .with_conn(|conn| q::list_for(conn, fid, limit.min(200)))?;
        Ok(rows.into_iter().map(|m| self.enrich(m)).collect())
    }

    /// Release `pending_external` proposals naming `fid` now that they are
    /// registered. Returns how many moved to `proposed`.
    pub fn activate_pending_for(&self, fid: Fid) -> Result<usize> {
        let now = self.engine.now();
        let ids = self
            .engine
            .db()
            .with_conn(|conn| q::pending_external_for(conn, fid))?;

        let mut activated = 0;
        for id in ids {
            let n = self.engine.db().with_conn_mut(|conn| {
                q::transition(
                    conn,
                    id,
                    &[MatchStatus::PendingExternal],
                    MatchStatus::Proposed,
                    false,
                    now,
                )
            })?;
            if n == 0 {
                continue;
            }
            activated += 1;
            if let Some(m) = self.engine.db().with_conn(|conn| q::get(conn, id))? {
                self.engine.notify(LifecycleEvent::ProposalActivated {
                    match_id: id,
                    party_a: m.party_a,
                    party_b: m.party_b,
                });
            }
        }
        Ok(activated)
    }

    /// Expire proposals that have waited for an answer longer than the
    /// configured maximum age. Safe to run concurrently.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.engine.config().proposal_max_age;
        let ids = self
            .engine
            .db()
            .with_conn(|conn| q::stale_ids(conn, cutoff))?;

        let mut expired = 0;
        for id in ids {
            expired += self.engine.db().with_conn_mut(|conn| {
                q::transition(
                    conn,
                    id,
                    &MatchStatus::AWAITING,
                    MatchStatus::Expired,
                    false,
                    now,
                )
            })?;
        }
        if expired > 0 {
            info!("Expired {} stale proposals", expired);
        }
        Ok(expired)
    }

    fn load(&self, match_id: Uuid) -> Result<Match> {
        self.engine
            .db()
            .with_conn(|conn| q::get(conn, match_id))?
            .ok_or_else(|| LifecycleError::not_found("match", match_id))
    }

    fn enrich(&self, record: Match) -> MatchView {
        let dir = self.engine.directory();
        MatchView {
            party_a_card: directory::card(dir, record.party_a),
            party_b_card: directory::card(dir, record.party_b),
            record,
        }
    }

    /// Our conditional write matched nothing. Re-read and report what the
    /// winner left behind: terminal, already what we wanted, or a genuine
    /// conflict the caller has to refresh for.
    fn resolve_lost_race(
        &self,
        match_id: Uuid,
        already_applied: impl Fn(&Match) -> bool,
    ) -> Result<Outcome<Match>> {
        let now = self.load(match_id)?;
        if now.status.is_terminal() {
            return Ok(already_terminal(now));
        }
        if already_applied(&now) {
            return Ok(Outcome::Unchanged { record: now });
        }
        debug!("Lost a write race on match {} ({})", match_id, now.status);
        Err(LifecycleError::ConcurrentModification)
    }
}

/// Cooldown and one-active-match checks shared by proposals and suggestions.
pub(crate) fn ensure_pair_available(
    conn: &Connection,
    pair: PairKey,
    now: DateTime<Utc>,
) -> Result<()> {
    cooldown::ensure_clear(conn, pair, now)?;
    if let Some(existing) = q::active_between(conn, pair)? {
        return Err(LifecycleError::Conflict(format!(
            "match {} between {} is still {}",
            existing.id, pair, existing.status
        )));
    }
    Ok(())
}

/// Trimmed intro text within the configured bounds.
pub(crate) fn validate_intro(engine: &Engine, message: &str) -> Result<String> {
    let cfg = engine.config();
    let trimmed = message.trim();
    let len = trimmed.chars().count();
    if len < cfg.intro_min_chars || len > cfg.intro_max_chars {
        return Err(LifecycleError::Validation(format!(
            "message must be {}-{} characters, got {}",
            cfg.intro_min_chars, cfg.intro_max_chars, len
        )));
    }
    Ok(trimmed.to_string())
}

fn already_terminal(record: Match) -> Outcome<Match> {
    debug!("Match {} already {}", record.id, record.status);
    Outcome::AlreadyTerminal {
        status: record.status.to_string(),
        record,
    }
}

fn invalid(record: &Match, action: &'static str) -> LifecycleError {
    LifecycleError::InvalidStateTransition {
        entity: "match",
        action,
        status: record.status.to_string(),
    }
}
