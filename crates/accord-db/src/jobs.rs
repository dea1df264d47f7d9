use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::rows::to_ts;

/// Claim the right to run `name` at `now` if it last ran at least
/// `interval_secs` ago (or never). Exactly one of several concurrent claimers
/// for the same interval gets `true`.
pub fn claim(conn: &Connection, name: &str, interval_secs: i64, now: DateTime<Utc>) -> Result<bool> {
    let n = conn.execute(
        "INSERT INTO job_runs (name, last_run_at) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET last_run_at = excluded.last_run_at
         WHERE job_runs.last_run_at + ?3 <= excluded.last_run_at",
        params![name, to_ts(now), interval_secs],
    )?;
    Ok(n == 1)
}
