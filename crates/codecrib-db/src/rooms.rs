use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use tracing::warn;
use uuid::Uuid;

use codecrib_types::models::{FileRecord, Participant, Room};

use crate::Database;
use crate::models::RoomRow;

const FILE_COLUMNS: &str = "id, name, ext, lines, read, content_ref";

impl Database {
    // -- Rooms --

    pub fn create_room(&self, code: &str, owner_id: &str, most_used_language: &str) -> Result<Room> {
        let created_at = Utc::now();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, code, owner_id, most_used_language, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (
                    Uuid::new_v4().to_string(),
                    code,
                    owner_id,
                    most_used_language,
                    created_at.to_rfc3339(),
                ),
            )?;
            Ok(())
        })?;

        Ok(Room {
            id: code.to_string(),
            owner_id: owner_id.to_string(),
            created_at,
            most_used_language: most_used_language.to_string(),
            files: vec![],
            participants: vec![],
        })
    }

    pub fn room_exists(&self, code: &str) -> Result<bool> {
        self.with_conn(|conn| Ok(room_row_id(conn, code)?.is_some()))
    }

    /// Full room with roster and manifest, looked up by its public code.
    pub fn get_room(&self, code: &str) -> Result<Option<Room>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, code, owner_id, most_used_language, created_at FROM rooms WHERE code = ?1",
                    [code],
                    map_room,
                )
                .optional()?;

            row.map(|row| load_room(conn, row)).transpose()
        })
    }

    /// Rooms owned by `owner_id`, oldest first. `page` is 1-based.
    /// Returns the page and the total number of owned rooms.
    pub fn list_rooms_by_owner(&self, owner_id: &str, page: u32, limit: u32) -> Result<(Vec<Room>, u64)> {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(limit);
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE owner_id = ?1",
                [owner_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT id, code, owner_id, most_used_language, created_at
                 FROM rooms
                 WHERE owner_id = ?1
                 ORDER BY created_at, rowid
                 LIMIT ?2 OFFSET ?3",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![owner_id, limit, offset as i64], map_room)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let rooms = rows
                .into_iter()
                .map(|row| load_room(conn, row))
                .collect::<Result<Vec<_>>>()?;

            Ok((rooms, total as u64))
        })
    }

    // -- Participants --

    /// Insert the participant or refresh its snapshot fields in place.
    /// Returns false when the room does not exist.
    pub fn upsert_participant(&self, code: &str, participant: &Participant) -> Result<bool> {
        self.with_conn(|conn| {
            let Some(room_id) = room_row_id(conn, code)? else {
                return Ok(false);
            };
            conn.execute(
                "INSERT INTO room_participants (room_id, user_id, name, profile_pic)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (room_id, user_id)
                 DO UPDATE SET name = excluded.name, profile_pic = excluded.profile_pic",
                rusqlite::params![
                    room_id,
                    participant.user_id,
                    participant.name,
                    participant.profile_pic_ref
                ],
            )?;
            Ok(true)
        })
    }

    /// Propagate a new profile image into every roster snapshot of the user.
    /// Returns the number of rooms touched.
    pub fn refresh_participant_profile_pic(&self, user_id: &str, profile_pic: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE room_participants SET profile_pic = ?2 WHERE user_id = ?1",
                (user_id, profile_pic),
            )?;
            Ok(changed)
        })
    }

    // -- Manifest --

    /// Append a file to the end of the room's manifest. The position is
    /// computed inside the INSERT so two concurrent appends cannot claim the
    /// same slot. Returns false when the room does not exist.
    pub fn append_file(&self, code: &str, file: &FileRecord) -> Result<bool> {
        self.with_conn(|conn| {
            let Some(room_id) = room_row_id(conn, code)? else {
                return Ok(false);
            };
            conn.execute(
                "INSERT INTO room_files (id, room_id, position, name, ext, lines, read, content_ref)
                 SELECT ?1, ?2, COALESCE(MAX(position), 0) + 1, ?3, ?4, ?5, ?6, ?7
                 FROM room_files WHERE room_id = ?2",
                rusqlite::params![
                    file.id,
                    room_id,
                    file.name,
                    file.ext,
                    file.lines as i64,
                    file.read,
                    file.content_ref
                ],
            )?;
            Ok(true)
        })
    }

    /// Newest manifest entry carrying this display name.
    pub fn find_file_by_name(&self, code: &str, name: &str) -> Result<Option<FileRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM room_files f JOIN rooms r ON f.room_id = r.id
                 WHERE r.code = ?1 AND f.name = ?2
                 ORDER BY f.position DESC LIMIT 1",
                prefixed_file_columns()
            );
            let file = conn.query_row(&sql, [code, name], map_file).optional()?;
            Ok(file)
        })
    }

    /// Set the shared read flag. Returns the updated entry, or None when the
    /// room or file does not exist.
    pub fn set_file_read(&self, code: &str, file_id: &str, read: bool) -> Result<Option<FileRecord>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(room_id) = room_row_id(&tx, code)? else {
                return Ok(None);
            };
            let changed = tx.execute(
                "UPDATE room_files SET read = ?3 WHERE room_id = ?1 AND id = ?2",
                rusqlite::params![room_id, file_id, read],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let file = query_file(&tx, &room_id, file_id)?;
            tx.commit()?;
            Ok(file)
        })
    }

    /// Drop a manifest entry. The blob it points at is left in place.
    /// Returns the removed entry, or None when nothing matched.
    pub fn remove_file(&self, code: &str, file_id: &str) -> Result<Option<FileRecord>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(room_id) = room_row_id(&tx, code)? else {
                return Ok(None);
            };
            let Some(file) = query_file(&tx, &room_id, file_id)? else {
                return Ok(None);
            };
            tx.execute(
                "DELETE FROM room_files WHERE room_id = ?1 AND id = ?2",
                (&room_id, file_id),
            )?;
            tx.commit()?;
            Ok(Some(file))
        })
    }
}

fn room_row_id(conn: &Connection, code: &str) -> Result<Option<String>> {
    let id = conn
        .query_row("SELECT id FROM rooms WHERE code = ?1", [code], |row| row.get(0))
        .optional()?;
    Ok(id)
}

fn load_room(conn: &Connection, row: RoomRow) -> Result<Room> {
    let mut stmt = conn.prepare(
        "SELECT user_id, name, profile_pic FROM room_participants
         WHERE room_id = ?1 ORDER BY rowid",
    )?;
    let participants = stmt
        .query_map([&row.id], |r| {
            Ok(Participant {
                user_id: r.get(0)?,
                name: r.get(1)?,
                profile_pic_ref: r.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let sql = format!(
        "SELECT {} FROM room_files WHERE room_id = ?1 ORDER BY position",
        FILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map([&row.id], map_file)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let created_at = DateTime::parse_from_rfc3339(&row.created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on room '{}': {}", row.created_at, row.code, e);
            DateTime::default()
        });

    Ok(Room {
        id: row.code,
        owner_id: row.owner_id,
        created_at,
        most_used_language: row.most_used_language,
        files,
        participants,
    })
}

fn query_file(conn: &Connection, room_id: &str, file_id: &str) -> Result<Option<FileRecord>> {
    let sql = format!(
        "SELECT {} FROM room_files WHERE room_id = ?1 AND id = ?2",
        FILE_COLUMNS
    );
    let file = conn.query_row(&sql, [room_id, file_id], map_file).optional()?;
    Ok(file)
}

fn prefixed_file_columns() -> String {
    FILE_COLUMNS
        .split(", ")
        .map(|c| format!("f.{}", c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_room(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        code: row.get(1)?,
        owner_id: row.get(2)?,
        most_used_language: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        ext: row.get(2)?,
        lines: row.get::<_, i64>(3)? as u64,
        read: row.get(4)?,
        content_ref: row.get(5)?,
    })
}
