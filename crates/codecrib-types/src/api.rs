use serde::{Deserialize, Serialize};

use crate::models::{FileRecord, Room, RosterEntry};

// -- JWT Claims --

/// JWT claims issued on register/login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

// -- Profile --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileImageResponse {
    pub message: String,
    pub profile_pic_ref: String,
}

// -- Rooms --

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub most_used_language: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room: Room,
}

/// Room plus its merged roster, with live status.
#[derive(Debug, Serialize, Deserialize)]
pub struct RoomDetail {
    pub room: Room,
    pub roster: Vec<RosterEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomPage {
    pub rooms: Vec<Room>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRoomResponse {
    pub room: Room,
    pub participant: RosterEntry,
}

// -- Files --

/// JSON form of a file attach: registers a manifest entry for content the
/// client already holds, without uploading bytes.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub file_name: Option<String>,
    pub file_ext: Option<String>,
    pub lines: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileResponse {
    pub file: FileRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FileContentResponse {
    pub content: String,
}
