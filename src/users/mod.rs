mod dto;
pub mod handlers;
#[cfg(test)]
pub(crate) mod memory;
mod repo;
mod repo_types;
mod services;

pub use repo::{PgUserRepository, StoreError, UserRepository};
pub use repo_types::{AvatarChange, NewUser, User};
pub use services::{UserError, UserService};

use crate::state::AppState;
use axum::Router;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::public_routes())
        .merge(handlers::protected_routes(state))
}
