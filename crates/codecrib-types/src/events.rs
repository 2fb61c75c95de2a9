use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, FileRecord, RosterEntry};

/// Events sent from the router to connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    /// Someone else entered the room
    #[serde(rename = "user-joined")]
    UserJoined { id: String, name: String, online: bool },

    /// Full merged roster, sent to the whole room after every join
    #[serde(rename = "room-participants")]
    RoomParticipants(Vec<RosterEntry>),

    /// Chat line with the server timestamp attached
    #[serde(rename = "message")]
    Message(ChatMessage),

    #[serde(rename = "newFile")]
    NewFile(FileRecord),

    #[serde(rename = "fileRead")]
    FileRead { file_name: String, user_id: String },

    #[serde(rename = "fileDelete")]
    FileDelete { file_name: String, user_id: String },

    /// Advisory visibility signal (tab hidden/focused), not connectivity
    #[serde(rename = "user-status")]
    UserStatus { user_id: String, online: bool },

    /// Last connection of a user in the room went away
    #[serde(rename = "user-left")]
    UserLeft { user_id: String, name: String },
}

/// Commands sent FROM client TO router over the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Associate this connection with a room. Identity fields are optional on
    /// the wire so that incomplete joins can be logged and ignored instead of
    /// failing to parse.
    #[serde(rename = "join")]
    Join {
        room_id: String,
        user_id: Option<String>,
        user_name: Option<String>,
    },

    #[serde(rename = "message")]
    Message(ChatMessage),

    #[serde(rename = "newFile")]
    NewFile(FileRecord),

    #[serde(rename = "fileRead")]
    FileRead { file_name: String },

    #[serde(rename = "fileDelete")]
    FileDelete { file_name: String },

    #[serde(rename = "statusChange")]
    StatusChange { online: bool },
}
