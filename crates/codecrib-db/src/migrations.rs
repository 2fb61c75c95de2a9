use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                  TEXT PRIMARY KEY,
            name                TEXT NOT NULL,
            email               TEXT NOT NULL UNIQUE,
            password            TEXT NOT NULL,
            profile_pic         TEXT,
            reset_token         TEXT,
            reset_token_expiry  INTEGER,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_users_reset_token
            ON users(reset_token);

        CREATE TABLE IF NOT EXISTS rooms (
            id                  TEXT PRIMARY KEY,
            code                TEXT NOT NULL UNIQUE,
            owner_id            TEXT NOT NULL,
            most_used_language  TEXT NOT NULL,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rooms_owner
            ON rooms(owner_id, created_at);

        -- Historical roster: one row per user per room, never deleted.
        CREATE TABLE IF NOT EXISTS room_participants (
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            user_id     TEXT NOT NULL,
            name        TEXT NOT NULL,
            profile_pic TEXT,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_room_participants_user
            ON room_participants(user_id);

        CREATE TABLE IF NOT EXISTS room_files (
            id          TEXT PRIMARY KEY,
            room_id     TEXT NOT NULL REFERENCES rooms(id),
            position    INTEGER NOT NULL,
            name        TEXT NOT NULL,
            ext         TEXT NOT NULL,
            lines       INTEGER NOT NULL,
            read        INTEGER NOT NULL DEFAULT 0,
            content_ref TEXT NOT NULL,
            UNIQUE (room_id, position)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
