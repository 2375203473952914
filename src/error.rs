use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::provider::UpstreamError;
use crate::services::deadline::DeadlineExceeded;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream deadline exceeded: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream denied access: {0}")]
    UpstreamDenied(String),

    #[error("Upstream resource not found: {0}")]
    UpstreamNotFound(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::UpstreamDenied(_) => StatusCode::FORBIDDEN,
            AppError::UpstreamNotFound(_) => StatusCode::NOT_FOUND,
            AppError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // Provider faults other than denial or absence are unexpected.
            AppError::UpstreamUnavailable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<UpstreamError> for AppError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(after) => {
                AppError::UpstreamTimeout(format!("no response within {}ms", after.as_millis()))
            }
            UpstreamError::Denied(msg) => AppError::UpstreamDenied(msg),
            UpstreamError::NotFound(msg) => AppError::UpstreamNotFound(msg),
            UpstreamError::Unavailable(msg) => AppError::UpstreamUnavailable(msg),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<DeadlineExceeded> for AppError {
    fn from(err: DeadlineExceeded) -> Self {
        AppError::UpstreamTimeout(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::UpstreamTimeout(msg)
            | AppError::UpstreamDenied(msg)
            | AppError::UpstreamNotFound(msg)
            | AppError::UpstreamUnavailable(msg)
            | AppError::Internal(msg) => msg,
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message);
        } else {
            tracing::warn!(status = %status, error = %message);
        }

        let body = json!({
            "data": null,
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
