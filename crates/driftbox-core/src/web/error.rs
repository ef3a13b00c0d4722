//! HTTP error mapping for the upload API.
//!
//! Every failure leaves the server as a JSON body carrying the error code
//! and message. Client-input errors map to 400, merge integrity errors to
//! 422, anything else to 500.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::multipart::MultipartError;
use serde::Serialize;

use crate::error::Error;

/// JSON error body returned by every endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Stable error code such as `E200`, absent for transport-level failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Message suitable for logs and tooling
    pub message: String,
    /// Underlying cause, when one is worth showing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    /// Error with an explicit status and no code.
    #[must_use]
    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            status,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Status the response is sent with.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.status
    }
}

/// Status an upload pipeline error is reported with.
#[must_use]
pub const fn status_for(err: &Error) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_integrity_error() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            code: err.code().map(String::from),
            status: status_for(&err),
            message: err.to_string(),
            details: None,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::with_status(err.status(), "malformed multipart body").with_details(err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, "invalid JSON body")
            .with_details(rejection.body_text())
    }
}

/// Result type for web handlers.
pub type ApiResult<T> = Result<T, ApiError>;
