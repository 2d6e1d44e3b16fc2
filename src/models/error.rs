use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// Response for an error
#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error shape returned by every API handler.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Build the standard error reply for a handler.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}
