use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThrottlerError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("No tokio runtime available to run background cache tasks")]
    RuntimeUnavailable,

    #[error("Missing identity: {0}")]
    MissingIdentity(String),

    #[error("Rate limit exceeded for {0}")]
    RateLimitExceeded(String),
}

pub type ThrottlerResult<T> = Result<T, ThrottlerError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        match err {
            ThrottlerError::RateLimitExceeded(_) => {
                Self::new("rate_limit_exceeded", "Rate limit exceeded", 429)
            }
            ThrottlerError::MissingIdentity(msg) => Self::new("unauthorized", msg, 401),
            ThrottlerError::Configuration(msg) => Self::new("configuration_error", msg, 500),
            ThrottlerError::Validation(errors) => {
                Self::new("configuration_error", &errors.to_string(), 500)
            }
            ThrottlerError::RuntimeUnavailable => {
                Self::new("internal_error", &err.to_string(), 500)
            }
        }
    }
}

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}
