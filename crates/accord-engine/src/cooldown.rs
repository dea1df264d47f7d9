use accord_db::cooldowns;
use accord_types::models::PairKey;
use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::Engine;
use crate::error::{LifecycleError, Result};

/// Pairwise throttle keyed by the unordered pair of participants.
///
/// An entry is written on every decline between the pair (matches and
/// suggestions share the ledger) and blocks new proposals while
/// `now < expires_at`. Entries are never deleted; they just stop blocking.
pub struct CooldownLedger<'a> {
    engine: &'a Engine,
}

impl<'a> CooldownLedger<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    pub fn is_in_cooldown(&self, pair: PairKey) -> Result<bool> {
        Ok(self.cooldown_expiry(pair)?.is_some())
    }

    /// When the cooldown on `pair` lifts, or `None` if it is not blocking now.
    pub fn cooldown_expiry(&self, pair: PairKey) -> Result<Option<DateTime<Utc>>> {
        let now = self.engine.now();
        self.engine
            .db()
            .with_conn(|conn| active_expiry(conn, pair, now))
    }

    /// Start (or restart) the cooldown for `pair` at `now`. Returns the expiry.
    pub fn trigger_cooldown(&self, pair: PairKey, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        reject_self_pair(pair)?;
        let window = self.engine.config().cooldown_window;
        let expires_at = self
            .engine
            .db()
            .with_conn_mut(|conn| trigger_within(conn, pair, now, window))?;
        Ok(expires_at)
    }
}

/// Upsert the cooldown entry inside an ongoing write. Every decline path calls
/// this in the same transaction as its status change.
pub(crate) fn trigger_within(
    conn: &Connection,
    pair: PairKey,
    now: DateTime<Utc>,
    window: Duration,
) -> anyhow::Result<DateTime<Utc>> {
    let expires_at = now + window;
    cooldowns::upsert(conn, pair, now, expires_at)?;
    info!("Cooldown on {} until {}", pair, expires_at);
    Ok(expires_at)
}

/// Fail with `CooldownActive` if `pair` is blocked at `now`.
pub(crate) fn ensure_clear(conn: &Connection, pair: PairKey, now: DateTime<Utc>) -> Result<()> {
    match active_expiry(conn, pair, now)? {
        Some(expires_at) => Err(LifecycleError::CooldownActive { expires_at }),
        None => Ok(()),
    }
}

fn active_expiry(
    conn: &Connection,
    pair: PairKey,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let row = cooldowns::get(conn, pair)?;
    Ok(row
        .map(|r| r.expires_at)
        .filter(|expires_at| now.timestamp() < expires_at.timestamp()))
}

fn reject_self_pair(pair: PairKey) -> Result<()> {
    if pair.low() == pair.high() {
        return Err(LifecycleError::Validation(
            "a participant cannot be paired with themselves".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::harness;
    use accord_types::models::Fid;

    #[test]
    fn blocks_until_expiry_then_lifts() {
        let h = harness();
        let ledger = h.engine.cooldowns();
        let pair = PairKey::new(Fid(200), Fid(100));

        assert!(!ledger.is_in_cooldown(pair).unwrap());
        let expires_at = ledger.trigger_cooldown(pair, h.engine.now()).unwrap();
        assert_eq!(expires_at, h.engine.now() + Duration::days(7));

        h.clock.set(expires_at - Duration::seconds(1));
        assert!(ledger.is_in_cooldown(pair).unwrap());
        assert_eq!(ledger.cooldown_expiry(pair).unwrap(), Some(expires_at));

        h.clock.set(expires_at);
        assert!(!ledger.is_in_cooldown(pair).unwrap());
        assert_eq!(ledger.cooldown_expiry(pair).unwrap(), None);
    }

    #[test]
    fn retrigger_overwrites_the_single_entry() {
        let h = harness();
        let ledger = h.engine.cooldowns();
        let t = h.engine.now();

        ledger.trigger_cooldown(PairKey::new(Fid(1), Fid(2)), t).unwrap();
        let later = t + Duration::days(3);
        ledger.trigger_cooldown(PairKey::new(Fid(2), Fid(1)), later).unwrap();

        let count: i64 = h
            .engine
            .db()
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM cooldowns", [], |r| r.get(0))
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            ledger.cooldown_expiry(PairKey::new(Fid(1), Fid(2))).unwrap(),
            Some(later + Duration::days(7))
        );
    }

    #[test]
    fn self_pair_is_rejected() {
        let h = harness();
        let err = h
            .engine
            .cooldowns()
            .trigger_cooldown(PairKey::new(Fid(5), Fid(5)), h.engine.now())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));
    }
}
