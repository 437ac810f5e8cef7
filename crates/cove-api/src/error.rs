use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cove_core::CoreError;
use thiserror::Error;
use tracing::error;

use cove_types::api::ErrorBody;

/// Boundary error: domain failures map to their taxonomy status, anything
/// unexpected collapses to a generic retryable 500 so internals never leak.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn internal(detail: impl ToString) -> Self {
        Self::Internal(detail.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Core(err) => {
                if let CoreError::Storage(cause) = err {
                    error!("storage failure: {cause}");
                }
                let status = match err {
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::NotFound => StatusCode::NOT_FOUND,
                    CoreError::Authorization(_) => StatusCode::FORBIDDEN,
                    CoreError::Conflict(_) => StatusCode::CONFLICT,
                    CoreError::Authentication(_) => StatusCode::UNAUTHORIZED,
                    CoreError::Storage(_) | CoreError::Corrupt(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.code(), err.to_string())
            }
            ApiError::Internal(detail) => {
                error!("internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage",
                    "storage failure".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                code: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}
