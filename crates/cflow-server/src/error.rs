//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cflow_common::FlowError;
use serde_json::json;
use thiserror::Error;

/// Result type alias for handler-facing operations
pub type AppResult<T> = std::result::Result<T, AppError>;

/// Application error surfaced through the HTTP layer
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Flow(FlowError::NotFound(message)) => (StatusCode::NOT_FOUND, message),
            AppError::Flow(FlowError::NotSupported(message)) => {
                (StatusCode::NOT_IMPLEMENTED, message)
            },
            AppError::Flow(FlowError::Configuration(ref message)) => {
                tracing::error!("Configuration error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server configuration error".to_string(),
                )
            },
            AppError::Flow(ref e) => {
                tracing::error!("Request failed: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            },
            AppError::Internal(ref message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message.clone())
            },
        };

        let body = Json(json!({
            "error": {
                "message": error_message,
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response =
            AppError::from(FlowError::NotFound("binding 9".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_not_supported_maps_to_501() {
        let response =
            AppError::from(FlowError::NotSupported("read".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    }

    #[test]
    fn test_transform_failure_maps_to_500() {
        let response =
            AppError::from(FlowError::Transform("bad sheet".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
