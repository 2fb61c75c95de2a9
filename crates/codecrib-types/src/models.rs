use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public view of a user. Password hash and reset token never leave the
/// identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub profile_pic_ref: Option<String>,
}

/// Historical roster entry of a room. Snapshot fields are refreshed in place
/// when the same user joins again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub profile_pic_ref: Option<String>,
}

/// One entry of a room's file manifest.
///
/// `read` is shared by every participant of the room, not tracked per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub ext: String,
    pub lines: u64,
    pub read: bool,
    #[serde(default)]
    pub content_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Short public token, distinct from the storage row id.
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub most_used_language: String,
    pub files: Vec<FileRecord>,
    pub participants: Vec<Participant>,
}

/// Merged view of a historical participant and its live presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub profile_pic_ref: Option<String>,
    pub online: bool,
}

/// Chat line relayed between connections of a room. Never persisted:
/// messages sent before a restart are gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub sender: String,
    pub sender_id: String,
    /// Assigned by the router at relay time; whatever the client sent is
    /// overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}
