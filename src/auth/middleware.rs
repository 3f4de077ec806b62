use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{error::ApiError, state::AppState, users::User};

const BEARER: &str = "Bearer";

/// The user resolved from a valid bearer token.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Returns the credential from an `Authorization` value. The scheme must be
/// `Bearer`; a value that is not exactly `<scheme> <credential>` yields an
/// empty credential, which never validates.
pub(crate) fn bearer_credential(header: Option<&str>) -> Result<&str, ApiError> {
    let header = header.ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;

    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.first() != Some(&BEARER) {
        return Err(ApiError::unauthorized(
            "Authorization header must use the Bearer scheme",
        ));
    }

    Ok(match parts.as_slice() {
        [_, credential] => *credential,
        _ => "",
    })
}

/// Guards protected routes: validates the bearer token, loads its user and
/// hands it to the handler as `CurrentUser`. Any failure ends the request
/// with 401.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims = {
        let header = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_credential(header)?;

        state.auth.validate_token(token).map_err(|e| {
            warn!(error = %e, "token rejected");
            ApiError::unauthorized("invalid or expired token")
        })?
    };

    let user = state
        .users
        .get_user_by_id(claims.user_id)
        .await
        .map_err(|e| {
            warn!(error = %e, user_id = %claims.user_id, "token user not resolved");
            ApiError::unauthorized("user not found")
        })?;

    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("authentication required"))
    }
}
