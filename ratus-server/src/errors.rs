use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use ratus_core::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error response carrying the HTTP status code and a caller-facing message.
///
/// The body shape is `{"error": {"code": <int>, "message": <string>}}` so
/// clients can reconstruct a typed error from the code.
#[derive(Debug)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Server-side faults are logged here so controllers do not have to.
        if self.code >= 500 {
            tracing::error!(code = self.code, message = %self.message, "request failed");
        }

        let status =
            StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));
        (status, body).into_response()
    }
}

/// Replace the message of a conflict with an endpoint-specific hint while
/// leaving every other kind untouched.
pub fn decorate_conflict(e: Error, hint: &str) -> Error {
    match e {
        Error::Conflict(_) => Error::Conflict(hint.to_owned()),
        other => other,
    }
}
