use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use super::repo_types::{AvatarChange, NewUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("database error")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `StoreError::Conflict` when the email is already taken.
    async fn insert(&self, user: NewUser) -> Result<User, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    /// Returns the updated user together with the key it replaced, read
    /// under the same row lock as the write.
    async fn update_avatar(
        &self,
        id: Uuid,
        avatar_file_name: &str,
    ) -> Result<AvatarChange, StoreError>;
    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        occupation: &str,
    ) -> Result<User, StoreError>;
}

const USER_COLUMNS: &str =
    "id, email, password_hash, name, occupation, avatar_file_name, role, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (email, password_hash, name, occupation, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.name)
            .bind(&user.occupation)
            .bind(&user.role)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::Conflict("email already registered".into())
                }
                other => StoreError::Database(other),
            })
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn update_avatar(
        &self,
        id: Uuid,
        avatar_file_name: &str,
    ) -> Result<AvatarChange, StoreError> {
        sqlx::query_as::<_, AvatarChange>(
            r#"
            WITH previous AS (
                SELECT id, avatar_file_name
                  FROM users
                 WHERE id = $1
                   FOR UPDATE
            )
            UPDATE users u
               SET avatar_file_name = $2, updated_at = now()
              FROM previous
             WHERE u.id = previous.id
            RETURNING u.id, u.email, u.password_hash, u.name, u.occupation,
                      u.avatar_file_name, u.role, u.created_at, u.updated_at,
                      previous.avatar_file_name AS previous_avatar_file_name
            "#,
        )
        .bind(id)
        .bind(avatar_file_name)
        .fetch_optional(&self.db)
        .await?
        .ok_or(StoreError::NotFound)
    }

    async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        occupation: &str,
    ) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET name = $2, occupation = $3, updated_at = now()
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(name)
            .bind(occupation)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
    }
}
