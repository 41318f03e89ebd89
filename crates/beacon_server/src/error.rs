//! Server error types

use axum::response::{IntoResponse, Response};
use beacon_api::ApiError;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Core error: {0}")]
    Core(#[from] beacon_core::CoreError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Invalid address: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Convert to ApiError for consistent error responses
        let api_error = match self {
            ServerError::Core(e) => ApiError::from(e),
            ServerError::Api(e) => e,
            ServerError::Jwt(_) => ApiError::unauthorized("Invalid or expired token"),
            _ => ApiError::ServiceUnavailable {
                retry_after_seconds: Some(30),
            },
        };

        api_error.into_response()
    }
}
