use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::repo_types::User;
use super::services::is_valid_email;

pub const MIN_PASSWORD_LEN: usize = 8;

/// Request body for `POST /users`.
#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub password: String,
}

impl RegisterUserRequest {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "name", &self.name);
        require(&mut errors, "occupation", &self.occupation);
        check_email(&mut errors, &self.email);
        if self.password.len() < MIN_PASSWORD_LEN {
            errors.push(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        errors
    }
}

/// Request body for `POST /sessions`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_email(&mut errors, &self.email);
        require(&mut errors, "password", &self.password);
        errors
    }
}

/// Request body for `POST /email_checkers`.
#[derive(Debug, Deserialize)]
pub struct CheckEmailRequest {
    #[serde(default)]
    pub email: String,
}

impl CheckEmailRequest {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_email(&mut errors, &self.email);
        errors
    }
}

/// Request body for `PUT /users/me`.
#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub occupation: String,
}

impl UpdateProfileRequest {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "name", &self.name);
        require(&mut errors, "occupation", &self.occupation);
        errors
    }
}

fn require(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} is required"));
    }
}

fn check_email(errors: &mut Vec<String>, email: &str) {
    let email = email.trim();
    if email.is_empty() {
        errors.push("email is required".into());
    } else if !is_valid_email(email) {
        errors.push("email is not a valid address".into());
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub occupation: String,
    pub email: String,
    pub avatar_file_name: Option<String>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl UserSummary {
    pub fn new(user: User, token: Option<String>) -> Self {
        Self {
            id: user.id,
            name: user.name,
            occupation: user.occupation,
            email: user.email,
            avatar_file_name: user.avatar_file_name,
            role: user.role,
            token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmailAvailability {
    pub is_available: bool,
}

#[derive(Debug, Serialize)]
pub struct AvatarUploaded {
    pub is_uploaded: bool,
    pub avatar_file_name: String,
}
