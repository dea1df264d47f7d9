use accord_types::models::{CloseReason, Fid, Message, Room, Side};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::rows::{
    MESSAGE_COLUMNS, OptionalExt, ROOM_COLUMNS, message_from_row, room_from_row, to_ts,
};

/// Insert a room unless the match already has one. Returns `true` if this
/// call created it.
pub fn insert_if_absent(conn: &Connection, room: &Room) -> Result<bool> {
    let n = conn.execute(
        "INSERT INTO rooms (id, match_id, party_a, party_b, ttl_seconds, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(match_id) DO NOTHING",
        params![
            room.id.to_string(),
            room.match_id.to_string(),
            room.party_a.0,
            room.party_b.0,
            room.ttl_seconds,
            to_ts(room.created_at),
        ],
    )?;
    Ok(n == 1)
}

pub fn get(conn: &Connection, id: Uuid) -> Result<Option<Room>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1");
    conn.query_row(&sql, [id.to_string()], room_from_row).optional()
}

pub fn get_by_match(conn: &Connection, match_id: Uuid) -> Result<Option<Room>> {
    let sql = format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE match_id = ?1");
    conn.query_row(&sql, [match_id.to_string()], room_from_row)
        .optional()
}

/// Set `first_join_at` if it is still unset and the room is open.
pub fn anchor(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<usize> {
    let n = conn.execute(
        "UPDATE rooms SET first_join_at = ?1
         WHERE id = ?2 AND first_join_at IS NULL AND is_closed = 0",
        params![to_ts(now), id.to_string()],
    )?;
    Ok(n)
}

pub fn set_completed(conn: &Connection, id: Uuid, side: Side) -> Result<usize> {
    let sql = match side {
        Side::A => "UPDATE rooms SET a_completed = 1 WHERE id = ?1 AND is_closed = 0 AND a_completed = 0",
        Side::B => "UPDATE rooms SET b_completed = 1 WHERE id = ?1 AND is_closed = 0 AND b_completed = 0",
    };
    Ok(conn.execute(sql, [id.to_string()])?)
}

/// Close the room on behalf of both participants once both flags are set.
pub fn close_if_both_completed(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<usize> {
    let n = conn.execute(
        "UPDATE rooms SET is_closed = 1, closed_at = ?1, closed_by = NULL, close_reason = 'completed'
         WHERE id = ?2 AND is_closed = 0 AND a_completed = 1 AND b_completed = 1",
        params![to_ts(now), id.to_string()],
    )?;
    Ok(n)
}

pub fn close(
    conn: &Connection,
    id: Uuid,
    closed_by: Option<Fid>,
    reason: CloseReason,
    now: DateTime<Utc>,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE rooms SET is_closed = 1, closed_at = ?1, closed_by = ?2, close_reason = ?3
         WHERE id = ?4 AND is_closed = 0",
        params![
            to_ts(now),
            closed_by.map(|f| f.0),
            reason.as_str(),
            id.to_string()
        ],
    )?;
    Ok(n)
}

/// Anchored, open rooms whose TTL has run out at `now`.
pub fn expired_ids(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM rooms
         WHERE is_closed = 0
           AND first_join_at IS NOT NULL
           AND first_join_at + ttl_seconds <= ?1",
    )?;
    let raw = stmt
        .query_map([to_ts(now)], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    raw.iter()
        .map(|s| s.parse::<Uuid>().map_err(anyhow::Error::from))
        .collect()
}

/// Close one room as expired. Guarded by the same predicate `expired_ids`
/// selects on, so overlapping sweeps close each room exactly once.
pub fn close_expired(conn: &Connection, id: Uuid, now: DateTime<Utc>) -> Result<usize> {
    let n = conn.execute(
        "UPDATE rooms SET is_closed = 1, closed_at = ?1, closed_by = NULL, close_reason = 'expired'
         WHERE id = ?2
           AND is_closed = 0
           AND first_join_at IS NOT NULL
           AND first_join_at + ttl_seconds <= ?1",
        params![to_ts(now), id.to_string()],
    )?;
    Ok(n)
}

/// Append a participant message only while the room is open and its TTL has
/// not run out at `now`. Returns rows inserted.
pub fn insert_message_if_open(conn: &Connection, msg: &Message, now: DateTime<Utc>) -> Result<usize> {
    let n = conn.execute(
        "INSERT INTO messages (id, room_id, sender, content, is_system, created_at)
         SELECT ?1, ?2, ?3, ?4, ?5, ?6
         WHERE EXISTS (
             SELECT 1 FROM rooms
              WHERE id = ?2
                AND is_closed = 0
                AND (first_join_at IS NULL OR first_join_at + ttl_seconds > ?7)
         )",
        params![
            msg.id.to_string(),
            msg.room_id.to_string(),
            msg.sender.map(|f| f.0),
            msg.content,
            msg.is_system_message,
            to_ts(msg.created_at),
            to_ts(now),
        ],
    )?;
    Ok(n)
}

pub fn insert_message(conn: &Connection, msg: &Message) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, room_id, sender, content, is_system, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            msg.id.to_string(),
            msg.room_id.to_string(),
            msg.sender.map(|f| f.0),
            msg.content,
            msg.is_system_message,
            to_ts(msg.created_at),
        ],
    )?;
    Ok(())
}

/// Newest first. `before` is a cursor: the id of the oldest message from the
/// previous page. Pages on `(created_at, rowid)` since many messages share a
/// second.
pub fn list_messages(
    conn: &Connection,
    room_id: Uuid,
    limit: u32,
    before: Option<Uuid>,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE room_id = ?1
           AND (?2 IS NULL OR (created_at, rowid) <
                (SELECT created_at, rowid FROM messages WHERE id = ?2 AND room_id = ?1))
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![room_id.to_string(), before.map(|id| id.to_string()), limit],
            message_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Rooms involving `fid` where both participants marked the meeting complete.
pub fn count_completed_meetings(conn: &Connection, fid: Fid) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM rooms
         WHERE (party_a = ?1 OR party_b = ?1) AND a_completed = 1 AND b_completed = 1",
        [fid.0],
        |r| r.get(0),
    )?;
    Ok(n)
}
