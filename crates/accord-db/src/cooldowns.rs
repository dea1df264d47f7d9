use accord_types::models::PairKey;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::models::CooldownRow;
use crate::rows::{OptionalExt, from_ts, to_ts};

/// Insert or overwrite the single entry for `pair`. Concurrent callers merge
/// on the primary key; the last write wins and no duplicate can exist.
pub fn upsert(
    conn: &Connection,
    pair: PairKey,
    triggered_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO cooldowns (fid_low, fid_high, triggered_at, expires_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(fid_low, fid_high) DO UPDATE SET
             triggered_at = excluded.triggered_at,
             expires_at = excluded.expires_at",
        params![
            pair.low().0,
            pair.high().0,
            to_ts(triggered_at),
            to_ts(expires_at)
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, pair: PairKey) -> Result<Option<CooldownRow>> {
    conn.query_row(
        "SELECT fid_low, fid_high, triggered_at, expires_at FROM cooldowns
         WHERE fid_low = ?1 AND fid_high = ?2",
        params![pair.low().0, pair.high().0],
        |row| {
            Ok(CooldownRow {
                fid_low: row.get(0)?,
                fid_high: row.get(1)?,
                triggered_at: from_ts(row.get(2)?),
                expires_at: from_ts(row.get(3)?),
            })
        },
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use accord_types::models::Fid;
    use chrono::Duration;

    #[test]
    fn upsert_keeps_one_row_per_pair() {
        let db = Database::open_in_memory().unwrap();
        let t0 = Utc::now();

        db.with_conn(|c| upsert(c, PairKey::new(Fid(9), Fid(3)), t0, t0 + Duration::days(7)))
            .unwrap();
        db.with_conn(|c| {
            upsert(
                c,
                PairKey::new(Fid(3), Fid(9)),
                t0 + Duration::days(1),
                t0 + Duration::days(8),
            )
        })
        .unwrap();

        let rows: i64 = db
            .with_conn(|c| {
                c.query_row("SELECT COUNT(*) FROM cooldowns", [], |r| r.get(0))
                    .map_err(anyhow::Error::from)
            })
            .unwrap();
        assert_eq!(rows, 1);

        let row = db
            .with_conn(|c| get(c, PairKey::new(Fid(9), Fid(3))))
            .unwrap()
            .unwrap();
        assert_eq!((row.fid_low, row.fid_high), (3, 9));
        assert_eq!(row.expires_at.timestamp(), (t0 + Duration::days(8)).timestamp());
    }
}
