use accord_types::models::{Fid, UserProfile};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::Database;
use crate::rows::{OptionalExt, profile_from_row, to_ts};

impl Database {
    /// Register a user or refresh their profile. Returns `true` when the fid
    /// was not known before.
    pub fn upsert_user(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let existed = query_user(conn, profile.fid)?.is_some();
            conn.execute(
                "INSERT INTO users (fid, username, display_name, avatar_url, bio, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(fid) DO UPDATE SET
                     username = excluded.username,
                     display_name = excluded.display_name,
                     avatar_url = excluded.avatar_url,
                     bio = excluded.bio,
                     updated_at = excluded.updated_at",
                params![
                    profile.fid.0,
                    profile.username,
                    profile.display_name,
                    profile.avatar_url,
                    profile.bio,
                    to_ts(now),
                ],
            )?;
            Ok(!existed)
        })
    }

    pub fn get_user(&self, fid: Fid) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| query_user(conn, fid))
    }
}

fn query_user(conn: &Connection, fid: Fid) -> Result<Option<UserProfile>> {
    let mut stmt = conn.prepare(
        "SELECT fid, username, display_name, avatar_url, bio FROM users WHERE fid = ?1",
    )?;
    stmt.query_row([fid.0], profile_from_row).optional()
}
