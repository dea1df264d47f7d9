use accord_types::models::{Fid, Side, Suggestion, SuggestionStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, params};
use uuid::Uuid;

use crate::rows::{OptionalExt, SUGGESTION_COLUMNS, accept_side_sql, in_list, suggestion_from_row, to_ts};

/// Insert a new suggestion. Returns `false` when an open suggestion for the
/// same ordered pair already exists.
pub fn insert(conn: &Connection, s: &Suggestion) -> Result<bool> {
    let res = conn.execute(
        "INSERT INTO suggestions (id, suggester, party_a, party_b, message, status,
                                  a_accepted, b_accepted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            s.id.to_string(),
            s.suggester.0,
            s.party_a.0,
            s.party_b.0,
            s.message,
            s.status.as_str(),
            s.a_accepted,
            s.b_accepted,
            to_ts(s.created_at),
            to_ts(s.updated_at),
        ],
    );

    match res {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Suggestion>> {
    let sql = format!("SELECT {SUGGESTION_COLUMNS} FROM suggestions WHERE id = ?1");
    conn.query_row(&sql, [id.to_string()], suggestion_from_row)
        .optional()
}

pub fn list_for_participant(conn: &Connection, fid: Fid, limit: u32) -> Result<Vec<Suggestion>> {
    list(
        conn,
        "party_a = ?1 OR party_b = ?1",
        fid,
        limit,
    )
}

pub fn list_by_suggester(conn: &Connection, fid: Fid, limit: u32) -> Result<Vec<Suggestion>> {
    list(conn, "suggester = ?1", fid, limit)
}

fn list(conn: &Connection, filter: &str, fid: Fid, limit: u32) -> Result<Vec<Suggestion>> {
    let sql = format!(
        "SELECT {SUGGESTION_COLUMNS} FROM suggestions
         WHERE {filter}
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![fid.0, limit], suggestion_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Record `side`'s acceptance while the suggestion is open. Returns rows
/// affected; the second acceptance leaves the row `accepted`.
pub fn accept_side(conn: &Connection, id: Uuid, side: Side, now: DateTime<Utc>) -> Result<usize> {
    let sql = accept_side_sql(
        "suggestions",
        side,
        &in_list(SuggestionStatus::OPEN.iter().map(|s| s.as_str())),
    );
    let n = conn.execute(&sql, params![to_ts(now), id.to_string()])?;
    Ok(n)
}

/// Move an open suggestion to a terminal status, clearing both flags.
pub fn close(
    conn: &Connection,
    id: Uuid,
    to: SuggestionStatus,
    now: DateTime<Utc>,
) -> Result<usize> {
    let sql = format!(
        "UPDATE suggestions SET status = ?1, a_accepted = 0, b_accepted = 0, updated_at = ?2
         WHERE id = ?3 AND status IN ({})",
        in_list(SuggestionStatus::OPEN.iter().map(|s| s.as_str()))
    );
    let n = conn.execute(&sql, params![to.as_str(), to_ts(now), id.to_string()])?;
    Ok(n)
}

/// Record the match and room a fulfilled suggestion produced. Write-once.
pub fn set_fulfilled(conn: &Connection, id: Uuid, match_id: Uuid, room_id: Uuid) -> Result<usize> {
    let n = conn.execute(
        "UPDATE suggestions SET match_id = ?1, room_id = ?2
         WHERE id = ?3 AND status = 'accepted' AND match_id IS NULL",
        params![match_id.to_string(), room_id.to_string(), id.to_string()],
    )?;
    Ok(n)
}
