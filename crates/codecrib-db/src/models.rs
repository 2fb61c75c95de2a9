/// Database row types, mapped directly from SQLite rows.
/// Distinct from codecrib-types models to keep the DB layer independent.
use codecrib_types::models::UserProfile;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub profile_pic: Option<String>,
    pub reset_token: Option<String>,
    /// Unix seconds. Set and cleared together with `reset_token`.
    pub reset_token_expiry: Option<i64>,
    pub created_at: String,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            profile_pic_ref: self.profile_pic.clone(),
        }
    }
}

pub struct RoomRow {
    pub id: String,
    pub code: String,
    pub owner_id: String,
    pub most_used_language: String,
    pub created_at: String,
}
