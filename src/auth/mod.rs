mod claims;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use jwt::{AuthService, TokenError};
pub use middleware::{require_auth, CurrentUser};
