use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Envelope wrapping every JSON body the API returns.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub status_code: u16,
    pub status: Status,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::OK.as_u16(),
            status: Status::Success,
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>, code: StatusCode, data: Option<T>) -> Self {
        Self {
            message: message.into(),
            status_code: code.as_u16(),
            status: Status::Error,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let code =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (code, Json(self)).into_response()
    }
}
