use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JWT payload. Deserialization fails on a missing or mistyped field, so a
/// decoded `Claims` always carries a usable user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid, // subject
    pub iat: usize,    // issued at (unix timestamp)
    pub exp: usize,    // expires at (unix timestamp)
    pub iss: String,   // issuer
}
