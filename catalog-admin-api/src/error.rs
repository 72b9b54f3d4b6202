use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use catalog_admin_core::{CoreError, ValidationIssue};
use serde_json::json;
use thiserror::Error;

use crate::response::{ErrorBody, ErrorEnvelope};
use crate::security::rate_limit::RateLimitError;

const GENERIC_INTERNAL_MESSAGE: &str = "An internal error occurred";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    #[error("Invalid or missing CSRF token")]
    CsrfInvalid,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Validation failed")]
    Validation(Vec<ValidationIssue>),

    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Unsupported content type: {0}")]
    InvalidContentType(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::CsrfInvalid | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_)
            | ApiError::InvalidJson(_)
            | ApiError::InvalidContentType(_)
            | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Core(err) => match err {
                CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                CoreError::SessionStore(_) | CoreError::Internal(_) | CoreError::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            ApiError::CsrfInvalid => "CSRF_TOKEN_INVALID",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::InvalidContentType(_) => "INVALID_CONTENT_TYPE",
            ApiError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Core(err) => match err {
                CoreError::Validation(_) => "VALIDATION_ERROR",
                CoreError::NotFound(_) => "NOT_FOUND",
                CoreError::Unauthorized(_) => "UNAUTHORIZED",
                _ => "INTERNAL_ERROR",
            },
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// Client-facing body. Server errors are redacted unless
    /// `expose_internal` is set (development mode).
    pub fn to_error_body(&self, expose_internal: bool) -> ErrorBody {
        match self {
            ApiError::RateLimited { retry_after_secs } => {
                ErrorBody::new(self.code(), "Too many requests, please try again later")
                    .with_details(json!({ "retryAfter": retry_after_secs }))
            }
            ApiError::Validation(issues) => ErrorBody::new(self.code(), "Request validation failed")
                .with_details(json!({ "issues": issues })),
            ApiError::PayloadTooLarge { limit } => ErrorBody::new(self.code(), self.to_string())
                .with_details(json!({ "limit": limit })),
            _ if self.is_server_error() && !expose_internal => {
                ErrorBody::new(self.code(), GENERIC_INTERNAL_MESSAGE)
            }
            _ => ErrorBody::new(self.code(), self.to_string()),
        }
    }

    /// Full response honouring the redaction flag
    pub fn into_response_with(self, expose_internal: bool) -> Response {
        let status = self.status();
        let envelope = ErrorEnvelope::new(self.to_error_body(expose_internal));
        let mut response = (status, Json(envelope)).into_response();

        if let ApiError::RateLimited { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

impl From<RateLimitError> for ApiError {
    fn from(err: RateLimitError) -> Self {
        ApiError::RateLimited {
            retry_after_secs: err.retry_after_secs(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for ApiError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::debug!(error = %err, "JWT rejected");
        ApiError::Unauthorized
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }
        self.into_response_with(false)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
