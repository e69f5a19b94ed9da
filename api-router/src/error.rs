use answer_pipeline::pipeline::ExchangeError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session busy: {0}")]
    SessionBusy(String),

    #[error("Upstream error: {0}")]
    UpstreamError(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Storage(_) | AppError::OpenAI(_) | AppError::Reqwest(_) => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            _ => Self::InternalError("Internal server error".to_string()),
        }
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Generation(e) => {
                tracing::error!("Generation chain failure: {:?}", e);
                Self::UpstreamError("Answer generation failed; the question was not recorded".to_string())
            }
            ExchangeError::Internal(e) => Self::from(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::SessionBusy(message) => (
                StatusCode::CONFLICT,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::UpstreamError(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::PayloadTooLarge(message) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use answer_pipeline::chain::GenerationError;
    use std::fmt::Debug;

    // Helper to check status code
    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(msg) if msg == "resource not found"));

        let validation = AppError::Validation("invalid input".to_string());
        let api_error = ApiError::from(validation);
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "invalid input"));

        let internal_error =
            AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "io error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_generation_failure_maps_to_upstream_error() {
        let err = ExchangeError::Generation(GenerationError::Malformed("bad".to_string()));
        let api_error = ApiError::from(err);
        assert!(matches!(api_error, ApiError::UpstreamError(_)));
        assert_status_code(api_error, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::SessionBusy("busy".to_string()),
            StatusCode::CONFLICT,
        );
        assert_status_code(
            ApiError::PayloadTooLarge("too big".to_string()),
            StatusCode::PAYLOAD_TOO_LARGE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        // The message carried inside InternalError must not leak through
        // Display.
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
