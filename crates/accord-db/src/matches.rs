use accord_types::models::{Fid, Match, MatchStatus, PairKey, Side};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::rows::{MATCH_COLUMNS, OptionalExt, accept_side_sql, in_list, match_from_row, to_ts};

pub fn insert(conn: &Connection, m: &Match) -> Result<()> {
    conn.execute(
        "INSERT INTO matches (id, party_a, party_b, created_by, message, status,
                              a_accepted, b_accepted, origin, suggestion_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            m.id.to_string(),
            m.party_a.0,
            m.party_b.0,
            m.created_by.0,
            m.message,
            m.status.as_str(),
            m.a_accepted,
            m.b_accepted,
            m.origin.as_str(),
            m.suggestion_id.map(|id| id.to_string()),
            to_ts(m.created_at),
            to_ts(m.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Match>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches m LEFT JOIN rooms r ON r.match_id = m.id WHERE m.id = ?1"
    );
    conn.query_row(&sql, [id.to_string()], match_from_row).optional()
}

/// Matches where `fid` is a participant or the creator, newest first.
pub fn list_for(conn: &Connection, fid: Fid, limit: u32) -> Result<Vec<Match>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches m LEFT JOIN rooms r ON r.match_id = m.id
         WHERE m.party_a = ?1 OR m.party_b = ?1 OR m.created_by = ?1
         ORDER BY m.created_at DESC, m.rowid DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![fid.0, limit], match_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The non-terminal match between the pair, in either orientation.
pub fn active_between(conn: &Connection, pair: PairKey) -> Result<Option<Match>> {
    let sql = format!(
        "SELECT {MATCH_COLUMNS} FROM matches m LEFT JOIN rooms r ON r.match_id = m.id
         WHERE ((m.party_a = ?1 AND m.party_b = ?2) OR (m.party_a = ?2 AND m.party_b = ?1))
           AND m.status IN ({})
         ORDER BY m.created_at DESC
         LIMIT 1",
        in_list(MatchStatus::ACTIVE.iter().map(|s| s.as_str()))
    );
    conn.query_row(&sql, params![pair.low().0, pair.high().0], match_from_row)
        .optional()
}

/// Number of matches involving `fid` that still wait on an answer.
pub fn count_awaiting_for(conn: &Connection, fid: Fid) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM matches
         WHERE (party_a = ?1 OR party_b = ?1) AND status IN ({})",
        in_list(MatchStatus::AWAITING.iter().map(|s| s.as_str()))
    );
    Ok(conn.query_row(&sql, [fid.0], |r| r.get(0))?)
}

/// Record `side`'s acceptance while the row is still open. The status
/// becomes `accepted` when the other side had already accepted. Returns rows
/// affected; 0 means the row moved on or `side` had already accepted.
pub fn accept_side(conn: &Connection, id: Uuid, side: Side, now: DateTime<Utc>) -> Result<usize> {
    let sql = accept_side_sql(
        "matches",
        side,
        &in_list(MatchStatus::DECLINABLE.iter().map(|s| s.as_str())),
    );
    let n = conn.execute(&sql, params![to_ts(now), id.to_string()])?;
    Ok(n)
}

/// Move a match to `to` if its current status is one of `from`. With
/// `reset_flags` both acceptance flags are cleared in the same write.
pub fn transition(
    conn: &Connection,
    id: Uuid,
    from: &[MatchStatus],
    to: MatchStatus,
    reset_flags: bool,
    now: DateTime<Utc>,
) -> Result<usize> {
    let flags = if reset_flags {
        ", a_accepted = 0, b_accepted = 0"
    } else {
        ""
    };
    let sql = format!(
        "UPDATE matches SET status = ?1, updated_at = ?2{flags}
         WHERE id = ?3 AND status IN ({})",
        in_list(from.iter().map(|s| s.as_str()))
    );
    let n = conn.execute(&sql, params![to.as_str(), to_ts(now), id.to_string()])?;
    Ok(n)
}

pub fn pending_external_for(conn: &Connection, fid: Fid) -> Result<Vec<Uuid>> {
    ids(
        conn,
        "SELECT id FROM matches
         WHERE status = 'pending_external' AND (party_a = ?1 OR party_b = ?1)",
        params![fid.0],
    )
}

/// Matches still waiting on an answer that were created before `cutoff`.
pub fn stale_ids(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let sql = format!(
        "SELECT id FROM matches WHERE status IN ({}) AND created_at < ?1",
        in_list(MatchStatus::AWAITING.iter().map(|s| s.as_str()))
    );
    ids(conn, &sql, params![to_ts(cutoff)])
}

/// Distinct counterparts `fid` has sent a direct proposal to.
pub fn count_unique_recipients(conn: &Connection, fid: Fid) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM (
             SELECT party_b AS recipient FROM matches
              WHERE created_by = ?1 AND origin = 'direct' AND party_b <> ?1
             UNION
             SELECT party_a FROM matches
              WHERE created_by = ?1 AND origin = 'direct' AND party_a <> ?1
         )",
        [fid.0],
        |r| r.get(0),
    )?;
    Ok(n)
}

fn ids(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(sql)?;
    let raw = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|s| s.parse::<Uuid>().map_err(anyhow::Error::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use accord_types::models::MatchOrigin;
    use chrono::TimeZone;

    fn sample(a: i64, b: i64, status: MatchStatus) -> Match {
        let t = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();
        Match {
            id: Uuid::new_v4(),
            party_a: Fid(a),
            party_b: Fid(b),
            created_by: Fid(a),
            message: "Would love to compare notes on rollups".into(),
            status,
            a_accepted: false,
            b_accepted: false,
            origin: MatchOrigin::Direct,
            suggestion_id: None,
            room_id: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn conditional_transition_reports_zero_rows_when_status_moved() {
        let db = Database::open_in_memory().unwrap();
        let m = sample(1, 2, MatchStatus::Proposed);
        let now = m.created_at;

        db.with_conn(|c| insert(c, &m)).unwrap();

        let first = db
            .with_conn(|c| {
                transition(c, m.id, &MatchStatus::DECLINABLE, MatchStatus::Declined, true, now)
            })
            .unwrap();
        let second = db
            .with_conn(|c| {
                transition(c, m.id, &MatchStatus::DECLINABLE, MatchStatus::Declined, true, now)
            })
            .unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        let stored = db.with_conn(|c| get(c, m.id)).unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Declined);
    }

    #[test]
    fn each_side_sets_only_its_own_flag() {
        let db = Database::open_in_memory().unwrap();
        let m = sample(1, 2, MatchStatus::Proposed);
        let now = m.created_at;
        db.with_conn(|c| insert(c, &m)).unwrap();

        assert_eq!(db.with_conn(|c| accept_side(c, m.id, Side::B, now)).unwrap(), 1);
        let stored = db.with_conn(|c| get(c, m.id)).unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::AcceptedByB);
        assert!(!stored.a_accepted && stored.b_accepted);

        // Repeating a side is a zero-row write
        assert_eq!(db.with_conn(|c| accept_side(c, m.id, Side::B, now)).unwrap(), 0);

        assert_eq!(db.with_conn(|c| accept_side(c, m.id, Side::A, now)).unwrap(), 1);
        let stored = db.with_conn(|c| get(c, m.id)).unwrap().unwrap();
        assert_eq!(stored.status, MatchStatus::Accepted);
        assert!(stored.a_accepted && stored.b_accepted);
    }

    #[test]
    fn acceptance_does_not_touch_a_declined_match() {
        let db = Database::open_in_memory().unwrap();
        let m = sample(1, 2, MatchStatus::Declined);
        db.with_conn(|c| insert(c, &m)).unwrap();
        assert_eq!(
            db.with_conn(|c| accept_side(c, m.id, Side::A, m.created_at)).unwrap(),
            0
        );
    }

    #[test]
    fn active_between_ignores_orientation_and_terminal_rows() {
        let db = Database::open_in_memory().unwrap();
        let declined = sample(5, 9, MatchStatus::Declined);
        let live = sample(9, 5, MatchStatus::AcceptedByA);
        db.with_conn(|c| insert(c, &declined)).unwrap();
        db.with_conn(|c| insert(c, &live)).unwrap();

        let found = db
            .with_conn(|c| active_between(c, PairKey::new(Fid(5), Fid(9))))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, live.id);
    }

    #[test]
    fn unique_recipients_counts_each_counterpart_once() {
        let db = Database::open_in_memory().unwrap();
        for b in [2, 3, 3, 4] {
            db.with_conn(|c| insert(c, &sample(1, b, MatchStatus::Declined)))
                .unwrap();
        }
        let n = db.with_conn(|c| count_unique_recipients(c, Fid(1))).unwrap();
        assert_eq!(n, 3);
    }
}
