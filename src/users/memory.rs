use std::collections::HashMap;

use axum::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, UserRepository};
use super::repo_types::{AvatarChange, NewUser, User};

/// In-process store with the same uniqueness rule as the `users` table.
#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        let now = OffsetDateTime::now_utc();
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            occupation: user.occupation,
            avatar_file_name: None,
            role: user.role,
            created_at: now,
            updated_at: now,
        };
        users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update_avatar(
        &self,
        id: Uuid,
        avatar_file_name: &str,
    ) -> Result<AvatarChange, StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        let previous_avatar_file_name = user
            .avatar_file_name
            .replace(avatar_file_name.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(AvatarChange {
            user: user.clone(),
            previous_avatar_file_name,
        })
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        occupation: &str,
    ) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(StoreError::NotFound)?;
        user.name = name.to_string();
        user.occupation = occupation.to_string();
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}
