use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::dto::{
    AvatarUploaded, CheckEmailRequest, EmailAvailability, LoginRequest, RegisterUserRequest,
    UpdateProfileRequest, UserSummary,
};
use super::services::Registration;
use crate::{
    auth::{require_auth, CurrentUser},
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    storage::{avatar_ext, avatar_key},
};

const AVATAR_FIELD: &str = "avatar";
const UPLOAD_FAILED: &str = "Failed to upload avatar image";
// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register_user))
        .route("/sessions", post(login))
        .route("/email_checkers", post(check_email_availability))
}

pub fn protected_routes(state: AppState) -> Router<AppState> {
    let body_limit = state.config.max_avatar_bytes + MULTIPART_OVERHEAD;
    Router::new()
        .route(
            "/avatars",
            post(upload_avatar).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/users/me", get(fetch_me).put(update_me))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>, message: &str) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rej| ApiError::validation(message, vec![rej.body_text()]))
}

fn ensure_valid(errors: Vec<String>, message: &str) -> Result<(), ApiError> {
    if errors.is_empty() {
        return Ok(());
    }
    warn!(?errors, "request validation failed");
    Err(ApiError::validation(message, errors))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::validation(UPLOAD_FAILED, vec![e.body_text()])
    }
}

#[instrument(skip_all)]
pub async fn register_user(
    State(state): State<AppState>,
    payload: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Result<ApiResponse<UserSummary>, ApiError> {
    const FAILED: &str = "Register account failed";
    let body = json_body(payload, FAILED)?;
    ensure_valid(body.validate(), FAILED)?;

    let user = state
        .users
        .register_user(Registration {
            name: &body.name,
            email: &body.email,
            occupation: &body.occupation,
            password: &body.password,
        })
        .await?;
    let token = state.auth.issue_token(user.id)?;

    Ok(ApiResponse::success(
        "Account has been registered",
        UserSummary::new(user, Some(token)),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<ApiResponse<UserSummary>, ApiError> {
    const FAILED: &str = "Login failed";
    let body = json_body(payload, FAILED)?;
    ensure_valid(body.validate(), FAILED)?;

    let user = state.users.login(&body.email, &body.password).await?;
    let token = state.auth.issue_token(user.id)?;

    Ok(ApiResponse::success(
        "Successfully logged in",
        UserSummary::new(user, Some(token)),
    ))
}

#[instrument(skip_all)]
pub async fn check_email_availability(
    State(state): State<AppState>,
    payload: Result<Json<CheckEmailRequest>, JsonRejection>,
) -> Result<ApiResponse<EmailAvailability>, ApiError> {
    const FAILED: &str = "Email checking failed";
    let body = json_body(payload, FAILED)?;
    ensure_valid(body.validate(), FAILED)?;

    let is_available = state.users.is_email_available(&body.email).await?;
    let message = if is_available {
        "Email is available"
    } else {
        "Email has been registered"
    };
    Ok(ApiResponse::success(message, EmailAvailability { is_available }))
}

/// POST /avatars (multipart, field `avatar`)
#[instrument(skip_all, fields(user_id = %current.0.id))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    current: CurrentUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<AvatarUploaded>, ApiError> {
    let CurrentUser(user) = current;
    let mut multipart =
        multipart.map_err(|rej| ApiError::validation(UPLOAD_FAILED, vec![rej.body_text()]))?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(AVATAR_FIELD) {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let Some(ext) = avatar_ext(&content_type) else {
            return Err(ApiError::validation(
                UPLOAD_FAILED,
                vec![format!("avatar must be an image, got {content_type:?}")],
            ));
        };
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((data, content_type, ext));
        break;
    }

    let Some((data, content_type, ext)) = upload else {
        return Err(ApiError::validation(
            UPLOAD_FAILED,
            vec![format!("{AVATAR_FIELD} is required")],
        ));
    };
    if data.is_empty() {
        return Err(ApiError::validation(
            UPLOAD_FAILED,
            vec![format!("{AVATAR_FIELD} is empty")],
        ));
    }
    if data.len() > state.config.max_avatar_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "avatar exceeds {} bytes",
            state.config.max_avatar_bytes
        )));
    }

    let key = avatar_key(user.id, ext);
    state.storage.put_object(&key, data, &content_type).await?;
    let change = match state.users.save_avatar(user.id, &key).await {
        Ok(change) => change,
        Err(e) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(error = %cleanup, key = %key, "failed to delete unsaved avatar");
            }
            return Err(e.into());
        }
    };

    // The replaced key comes from the row itself, not the snapshot the
    // middleware loaded, so concurrent uploads each delete what they replaced.
    if let Some(previous) = change.previous_avatar_file_name.as_deref() {
        if previous != key {
            if let Err(e) = state.storage.delete_object(previous).await {
                warn!(error = %e, key = previous, "failed to delete previous avatar");
            }
        }
    }

    info!(key = %key, "avatar uploaded");
    Ok(ApiResponse::success(
        "Avatar successfully uploaded",
        AvatarUploaded {
            is_uploaded: true,
            avatar_file_name: key,
        },
    ))
}

pub async fn fetch_me(CurrentUser(user): CurrentUser) -> ApiResponse<UserSummary> {
    ApiResponse::success("Successfully fetched user data", UserSummary::new(user, None))
}

#[instrument(skip_all, fields(user_id = %current.0.id))]
pub async fn update_me(
    State(state): State<AppState>,
    current: CurrentUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<ApiResponse<UserSummary>, ApiError> {
    const FAILED: &str = "Update profile failed";
    let body = json_body(payload, FAILED)?;
    ensure_valid(body.validate(), FAILED)?;

    let user = state
        .users
        .update_profile(current.0.id, &body.name, &body.occupation)
        .await?;
    Ok(ApiResponse::success(
        "Profile has been updated",
        UserSummary::new(user, None),
    ))
}
