use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, info};

use codecrib_types::api::{Claims, CreateRoomRequest, JoinRoomResponse, RoomDetail, RoomPage, RoomResponse};
use codecrib_types::models::{Participant, RosterEntry};

use crate::error::reject;
use crate::{AppState, blocking};

const DEFAULT_LANGUAGE: &str = "JavaScript";
const MAX_PAGE_SIZE: u32 = 50;
const CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct RoomQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    6
}

/// Public room code: 3 random bytes, hex encoded.
fn room_code() -> String {
    hex::encode(rand::random::<[u8; 3]>())
}

pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let language = req
        .most_used_language
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

    let db = state.db.clone();
    let owner = claims.sub.clone();
    let room = blocking(move || {
        for _ in 0..CODE_ATTEMPTS {
            let code = room_code();
            if !db.room_exists(&code)? {
                return db.create_room(&code, &owner, &language).map(Some);
            }
        }
        Ok(None)
    })
    .await?
    .ok_or_else(|| {
        error!("No free room code after {} attempts", CODE_ATTEMPTS);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    info!("{} created room {}", claims.sub, room.id);

    Ok((StatusCode::CREATED, Json(RoomResponse { room })))
}

/// Rooms owned by the caller, oldest first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<RoomQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let page = query.page.max(1);
    let limit = query.limit.clamp(1, MAX_PAGE_SIZE);

    let db = state.db.clone();
    let (rooms, total) =
        blocking(move || db.list_rooms_by_owner(&claims.sub, page, limit)).await?;

    Ok(Json(RoomPage {
        rooms,
        total,
        page,
        limit,
    }))
}

pub async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let rid = room_id.clone();
    let room = blocking(move || db.get_room(&rid))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;
    let roster = state.router.roster(&room_id).await.map_err(reject)?;

    Ok(Json(RoomDetail { room, roster }))
}

/// Record the caller in the room's roster, refreshing its name and image
/// snapshot.
pub async fn join_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(room_id): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let (rid, uid) = (room_id.clone(), claims.sub.clone());
    let (room, participant) = blocking(move || {
        let Some(user) = db.get_user_by_id(&uid)? else {
            return Ok(None);
        };
        let participant = Participant {
            user_id: user.id,
            name: user.name,
            profile_pic_ref: user.profile_pic,
        };
        if !db.upsert_participant(&rid, &participant)? {
            return Ok(None);
        }
        Ok(db.get_room(&rid)?.map(|room| (room, participant)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    let online = state.router.is_online(&room_id, &participant.user_id).await;
    Ok(Json(JoinRoomResponse {
        room,
        participant: RosterEntry {
            id: participant.user_id,
            name: participant.name,
            profile_pic_ref: participant.profile_pic_ref,
            online,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_codes_are_six_hex_chars() {
        let code = room_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
