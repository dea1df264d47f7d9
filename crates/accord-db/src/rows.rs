//! Row mappers shared by the query modules.

use std::str::FromStr;

use accord_types::models::{
    AchievementRecord, Fid, Match, Message, Room, Side, Suggestion, UserProfile,
};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

pub fn to_ts(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

pub fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}

pub(crate) const MATCH_COLUMNS: &str = "m.id, m.party_a, m.party_b, m.created_by, m.message, m.status,
     m.a_accepted, m.b_accepted, m.origin, m.suggestion_id, r.id, m.created_at, m.updated_at";

pub(crate) fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    Ok(Match {
        id: parse(row, 0)?,
        party_a: Fid(row.get(1)?),
        party_b: Fid(row.get(2)?),
        created_by: Fid(row.get(3)?),
        message: row.get(4)?,
        status: parse(row, 5)?,
        a_accepted: row.get(6)?,
        b_accepted: row.get(7)?,
        origin: parse(row, 8)?,
        suggestion_id: parse_opt(row, 9)?,
        room_id: parse_opt(row, 10)?,
        created_at: from_ts(row.get(11)?),
        updated_at: from_ts(row.get(12)?),
    })
}

pub(crate) const SUGGESTION_COLUMNS: &str = "id, suggester, party_a, party_b, message, status,
     a_accepted, b_accepted, match_id, room_id, created_at, updated_at";

pub(crate) fn suggestion_from_row(row: &Row<'_>) -> rusqlite::Result<Suggestion> {
    Ok(Suggestion {
        id: parse(row, 0)?,
        suggester: Fid(row.get(1)?),
        party_a: Fid(row.get(2)?),
        party_b: Fid(row.get(3)?),
        message: row.get(4)?,
        status: parse(row, 5)?,
        a_accepted: row.get(6)?,
        b_accepted: row.get(7)?,
        match_id: parse_opt(row, 8)?,
        conversation_room_id: parse_opt(row, 9)?,
        created_at: from_ts(row.get(10)?),
        updated_at: from_ts(row.get(11)?),
    })
}

pub(crate) const ROOM_COLUMNS: &str = "id, match_id, party_a, party_b, first_join_at, ttl_seconds,
     a_completed, b_completed, is_closed, closed_at, closed_by, close_reason, created_at";

pub(crate) fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: parse(row, 0)?,
        match_id: parse(row, 1)?,
        party_a: Fid(row.get(2)?),
        party_b: Fid(row.get(3)?),
        first_join_at: row.get::<_, Option<i64>>(4)?.map(from_ts),
        ttl_seconds: row.get(5)?,
        a_completed: row.get(6)?,
        b_completed: row.get(7)?,
        is_closed: row.get(8)?,
        closed_at: row.get::<_, Option<i64>>(9)?.map(from_ts),
        closed_by: row.get::<_, Option<i64>>(10)?.map(Fid),
        close_reason: parse_opt(row, 11)?,
        created_at: from_ts(row.get(12)?),
    })
}

pub(crate) const MESSAGE_COLUMNS: &str = "id, room_id, sender, content, is_system, created_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parse(row, 0)?,
        room_id: parse(row, 1)?,
        sender: row.get::<_, Option<i64>>(2)?.map(Fid),
        content: row.get(3)?,
        is_system_message: row.get(4)?,
        created_at: from_ts(row.get(5)?),
    })
}

pub(crate) fn achievement_from_row(row: &Row<'_>) -> rusqlite::Result<AchievementRecord> {
    Ok(AchievementRecord {
        fid: Fid(row.get(0)?),
        code: row.get(1)?,
        points: row.get(2)?,
        awarded_at: from_ts(row.get(3)?),
    })
}

pub(crate) fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        fid: Fid(row.get(0)?),
        username: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        bio: row.get(4)?,
    })
}

/// Render a fixed set of statuses as an SQL `IN` list. Only ever fed
/// `as_str()` values, never caller input.
pub(crate) fn in_list<'a>(statuses: impl IntoIterator<Item = &'a str>) -> String {
    statuses
        .into_iter()
        .map(|s| format!("'{}'", s))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Set one side's acceptance flag and derive the status from the other
/// side's flag in the same statement, so two acceptances never overwrite
/// each other. Only rows whose status is in `open` and whose flag for `side`
/// is still clear are touched. Binds `?1` = updated_at, `?2` = id.
pub(crate) fn accept_side_sql(table: &str, side: Side, open: &str) -> String {
    let (mine, theirs, half) = match side {
        Side::A => ("a_accepted", "b_accepted", "accepted_by_a"),
        Side::B => ("b_accepted", "a_accepted", "accepted_by_b"),
    };
    format!(
        "UPDATE {table} SET {mine} = 1,
                status = CASE WHEN {theirs} = 1 THEN 'accepted' ELSE '{half}' END,
                updated_at = ?1
         WHERE id = ?2 AND {mine} = 0 AND status IN ({open})"
    )
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> anyhow::Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> anyhow::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
