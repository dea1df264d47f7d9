use accord_types::models::{AchievementRecord, Fid};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::rows::{achievement_from_row, to_ts};

/// Insert the (fid, code) record unless it exists. Returns `true` if inserted.
pub fn insert_if_absent(
    conn: &Connection,
    fid: Fid,
    code: &str,
    points: i64,
    now: DateTime<Utc>,
) -> Result<bool> {
    let n = conn.execute(
        "INSERT OR IGNORE INTO achievements (fid, code, points, awarded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![fid.0, code, points, to_ts(now)],
    )?;
    Ok(n == 1)
}

/// Add points to the user's total, clamped to `cap`. Never lowers a total.
pub fn add_points(
    conn: &Connection,
    fid: Fid,
    points: i64,
    cap: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO user_levels (fid, points_total, updated_at)
         VALUES (?1, MIN(MAX(?2, 0), ?3), ?4)
         ON CONFLICT(fid) DO UPDATE SET
             points_total = MAX(points_total, MIN(points_total + MAX(?2, 0), ?3)),
             updated_at = excluded.updated_at",
        params![fid.0, points, cap, to_ts(now)],
    )?;
    Ok(())
}

pub fn points_total(conn: &Connection, fid: Fid) -> Result<i64> {
    let total = conn.query_row(
        "SELECT COALESCE((SELECT points_total FROM user_levels WHERE fid = ?1), 0)",
        [fid.0],
        |r| r.get(0),
    )?;
    Ok(total)
}

pub fn list_for(conn: &Connection, fid: Fid) -> Result<Vec<AchievementRecord>> {
    let mut stmt = conn.prepare(
        "SELECT fid, code, points, awarded_at FROM achievements
         WHERE fid = ?1
         ORDER BY awarded_at, code",
    )?;
    let rows = stmt
        .query_map([fid.0], achievement_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[test]
    fn points_are_clamped_to_cap() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.with_conn(|c| add_points(c, Fid(1), 700, 1000, now)).unwrap();
        db.with_conn(|c| add_points(c, Fid(1), 700, 1000, now)).unwrap();
        assert_eq!(db.with_conn(|c| points_total(c, Fid(1))).unwrap(), 1000);
        assert_eq!(db.with_conn(|c| points_total(c, Fid(2))).unwrap(), 0);
    }

    #[test]
    fn duplicate_award_is_ignored() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        assert!(db.with_conn(|c| insert_if_absent(c, Fid(1), "sent_5", 50, now)).unwrap());
        assert!(!db.with_conn(|c| insert_if_absent(c, Fid(1), "sent_5", 50, now)).unwrap());
        assert_eq!(db.with_conn(|c| list_for(c, Fid(1))).unwrap().len(), 1);
    }
}
