use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::repo::{StoreError, UserRepository};
use super::repo_types::{AvatarChange, NewUser, User, DEFAULT_ROLE};
use crate::auth::password::{self, PasswordError};

#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error(transparent)]
    Password(#[from] PasswordError),
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub struct Registration<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub occupation: &'a str,
    pub password: &'a str,
}

#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register_user(&self, input: Registration<'_>) -> Result<User, UserError> {
        let email = normalize_email(input.email);

        if self.repo.find_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(StoreError::Conflict("email already registered".into()).into());
        }

        let user = self
            .repo
            .insert(NewUser {
                email,
                password_hash: password::hash(input.password)?,
                name: input.name.trim().to_string(),
                occupation: input.occupation.trim().to_string(),
                role: DEFAULT_ROLE.to_string(),
            })
            .await?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Authenticates by credentials. Unknown email and wrong password are
    /// indistinguishable to the caller.
    #[instrument(skip(self, plain_password))]
    pub async fn login(&self, email: &str, plain_password: &str) -> Result<User, UserError> {
        let email = normalize_email(email);
        let Some(user) = self.repo.find_by_email(&email).await? else {
            warn!("login unknown email");
            return Err(UserError::InvalidCredentials);
        };

        if !password::matches(plain_password, &user.password_hash)? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(UserError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        Ok(user)
    }

    pub async fn is_email_available(&self, email: &str) -> Result<bool, UserError> {
        let email = normalize_email(email);
        Ok(self.repo.find_by_email(&email).await?.is_none())
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> Result<User, UserError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(UserError::Store(StoreError::NotFound))
    }

    #[instrument(skip(self))]
    pub async fn save_avatar(
        &self,
        id: Uuid,
        avatar_file_name: &str,
    ) -> Result<AvatarChange, UserError> {
        let change = self.repo.update_avatar(id, avatar_file_name).await?;
        info!(user_id = %change.user.id, "avatar saved");
        Ok(change)
    }

    #[instrument(skip(self))]
    pub async fn update_profile(
        &self,
        id: Uuid,
        name: &str,
        occupation: &str,
    ) -> Result<User, UserError> {
        Ok(self
            .repo
            .update_profile(id, name.trim(), occupation.trim())
            .await?)
    }
}
