use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                fid             INTEGER PRIMARY KEY,
                username        TEXT NOT NULL,
                display_name    TEXT,
                avatar_url      TEXT,
                bio             TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE matches (
                id              TEXT PRIMARY KEY,
                party_a         INTEGER NOT NULL,
                party_b         INTEGER NOT NULL,
                created_by      INTEGER NOT NULL,
                message         TEXT NOT NULL,
                status          TEXT NOT NULL,
                a_accepted      INTEGER NOT NULL DEFAULT 0,
                b_accepted      INTEGER NOT NULL DEFAULT 0,
                origin          TEXT NOT NULL DEFAULT 'direct',
                suggestion_id   TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                CHECK (party_a <> party_b)
            );

            CREATE INDEX idx_matches_party_a ON matches(party_a, status);
            CREATE INDEX idx_matches_party_b ON matches(party_b, status);
            CREATE INDEX idx_matches_created_by ON matches(created_by, origin);

            CREATE TABLE suggestions (
                id              TEXT PRIMARY KEY,
                suggester       INTEGER NOT NULL,
                party_a         INTEGER NOT NULL,
                party_b         INTEGER NOT NULL,
                message         TEXT NOT NULL,
                status          TEXT NOT NULL,
                a_accepted      INTEGER NOT NULL DEFAULT 0,
                b_accepted      INTEGER NOT NULL DEFAULT 0,
                match_id        TEXT,
                room_id         TEXT,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL,
                CHECK (party_a <> party_b),
                CHECK (suggester <> party_a AND suggester <> party_b)
            );

            -- One open suggestion per ordered pair
            CREATE UNIQUE INDEX idx_suggestions_open_pair
                ON suggestions(party_a, party_b)
                WHERE status IN ('proposed', 'accepted_by_a', 'accepted_by_b');

            CREATE INDEX idx_suggestions_suggester ON suggestions(suggester);

            CREATE TABLE cooldowns (
                fid_low         INTEGER NOT NULL,
                fid_high        INTEGER NOT NULL,
                triggered_at    INTEGER NOT NULL,
                expires_at      INTEGER NOT NULL,
                PRIMARY KEY (fid_low, fid_high),
                CHECK (fid_low < fid_high)
            );

            CREATE TABLE rooms (
                id              TEXT PRIMARY KEY,
                match_id        TEXT NOT NULL UNIQUE REFERENCES matches(id),
                party_a         INTEGER NOT NULL,
                party_b         INTEGER NOT NULL,
                first_join_at   INTEGER,
                ttl_seconds     INTEGER NOT NULL,
                a_completed     INTEGER NOT NULL DEFAULT 0,
                b_completed     INTEGER NOT NULL DEFAULT 0,
                is_closed       INTEGER NOT NULL DEFAULT 0,
                closed_at       INTEGER,
                closed_by       INTEGER,
                close_reason    TEXT,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_rooms_open ON rooms(is_closed, first_join_at);

            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                room_id         TEXT NOT NULL REFERENCES rooms(id),
                sender          INTEGER,
                content         TEXT NOT NULL,
                is_system       INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, created_at);

            CREATE TABLE achievements (
                fid             INTEGER NOT NULL,
                code            TEXT NOT NULL,
                points          INTEGER NOT NULL,
                awarded_at      INTEGER NOT NULL,
                PRIMARY KEY (fid, code)
            );

            CREATE TABLE user_levels (
                fid             INTEGER PRIMARY KEY,
                points_total    INTEGER NOT NULL DEFAULT 0,
                updated_at      INTEGER NOT NULL
            );

            CREATE TABLE job_runs (
                name            TEXT PRIMARY KEY,
                last_run_at     INTEGER NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (normalize legacy 'pending' status)");
        conn.execute_batch(
            "
            UPDATE matches SET status = 'proposed' WHERE status = 'pending';
            UPDATE suggestions SET status = 'proposed' WHERE status = 'pending';
            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }
}
