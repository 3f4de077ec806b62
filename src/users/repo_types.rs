use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_ROLE: &str = "user";

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub name: String,
    pub occupation: String,
    pub avatar_file_name: Option<String>, // object key in the avatar bucket
    pub role: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row to insert on registration; id and timestamps come from the database.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub occupation: String,
    pub role: String,
}

/// Result of pointing a user at a new avatar object.
#[derive(Debug, Clone, FromRow)]
pub struct AvatarChange {
    #[sqlx(flatten)]
    pub user: User,
    pub previous_avatar_file_name: Option<String>, // key that was replaced, if any
}
