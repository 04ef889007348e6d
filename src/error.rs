//! Error handling for the API Gateway
//!
//! Every client-visible failure maps onto the `{code, message, data?}`
//! envelope with a stable business code alongside the HTTP status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::services::signature::SignatureError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Main error type for the gateway.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("client {client_id} is disabled")]
    ClientDisabled { client_id: String },

    #[error("signature validation failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("unsupported version: {version}")]
    UnsupportedVersion { version: String },

    #[error("insufficient calls for client {client_id} (remaining: {remaining})")]
    InsufficientCalls { client_id: String, remaining: i64 },

    #[error("rate limit exceeded for client {client_id} (qps: {qps})")]
    RateLimitExceeded { client_id: String, qps: u32 },

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream error: {message}")]
    Upstream { message: String },

    #[error("task not found")]
    TaskNotFound,

    #[error("access to task denied")]
    TaskForbidden,

    #[error("task queue unavailable")]
    QueueUnavailable,

    /// A blocking operation was interrupted by shutdown. Never surfaces in
    /// an HTTP response; consumers match on it to exit their loops.
    #[error("operation cancelled")]
    Cancelled,

    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    #[error("invalid request: {message}")]
    Validation { message: String },

    #[error("internal server error: {message}")]
    Internal { message: String },
}

/// JSON envelope for client-visible errors.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiError {
    pub fn client_disabled(client_id: impl Into<String>) -> Self {
        Self::ClientDisabled {
            client_id: client_id.into(),
        }
    }

    pub fn unsupported_version(version: impl Into<String>) -> Self {
        Self::UnsupportedVersion {
            version: version.into(),
        }
    }

    pub fn insufficient_calls(client_id: impl Into<String>, remaining: i64) -> Self {
        Self::InsufficientCalls {
            client_id: client_id.into(),
            remaining,
        }
    }

    pub fn rate_limit_exceeded(client_id: impl Into<String>, qps: u32) -> Self {
        Self::RateLimitExceeded {
            client_id: client_id.into(),
            qps,
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::ClientDisabled { .. } => StatusCode::FORBIDDEN,
            ApiError::Signature(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnsupportedVersion { .. } => StatusCode::BAD_REQUEST,
            ApiError::InsufficientCalls { .. } => StatusCode::PAYMENT_REQUIRED,
            ApiError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ApiError::TaskNotFound => StatusCode::NOT_FOUND,
            ApiError::TaskForbidden => StatusCode::FORBIDDEN,
            ApiError::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::HttpClient(_) => StatusCode::BAD_GATEWAY,
            ApiError::Config(_)
            | ApiError::Database(_)
            | ApiError::Redis(_)
            | ApiError::Json(_)
            | ApiError::Metrics(_)
            | ApiError::Io(_)
            | ApiError::Cancelled
            | ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable business code carried in the response envelope.
    pub fn business_code(&self) -> u32 {
        match self {
            ApiError::InvalidApiKey => 40001,
            ApiError::ClientDisabled { .. } => 40002,
            ApiError::Signature(err) => err.business_code(),
            ApiError::UnsupportedVersion { .. } => 40004,
            ApiError::InsufficientCalls { .. } => 40301,
            ApiError::RateLimitExceeded { .. } => 42902,
            ApiError::UpstreamTimeout => 50401,
            ApiError::Upstream { .. } => 50402,
            ApiError::TaskNotFound => 40400,
            ApiError::TaskForbidden => 40300,
            ApiError::QueueUnavailable => 50300,
            ApiError::NotFound { .. } => 40401,
            ApiError::Validation { .. } => 40000,
            _ => 50000,
        }
    }

    /// Structured details attached to the envelope, where the code alone is
    /// not actionable for the caller.
    fn envelope_data(&self) -> Option<Value> {
        match self {
            ApiError::ClientDisabled { client_id } => {
                Some(serde_json::json!({ "client_id": client_id }))
            }
            ApiError::InsufficientCalls {
                client_id,
                remaining,
            } => Some(serde_json::json!({
                "client_id": client_id,
                "remaining_calls": remaining,
            })),
            ApiError::RateLimitExceeded { client_id, qps } => Some(serde_json::json!({
                "client_id": client_id,
                "qps_limit": qps,
            })),
            ApiError::UnsupportedVersion { version } => {
                Some(serde_json::json!({ "version": version }))
            }
            ApiError::Upstream { message } => {
                Some(serde_json::json!({ "upstream_message": message }))
            }
            ApiError::Signature(err) => Some(serde_json::json!({ "error": err.to_string() })),
            _ => None,
        }
    }

    /// Message shown to the caller. Infrastructure errors collapse to a
    /// generic message so internals never leak through the envelope.
    fn envelope_message(&self) -> String {
        match self {
            ApiError::Config(_)
            | ApiError::Database(_)
            | ApiError::Redis(_)
            | ApiError::Json(_)
            | ApiError::Metrics(_)
            | ApiError::Io(_) => "internal server error".to_string(),
            ApiError::HttpClient(_) => "upstream request failed".to_string(),
            ApiError::Signature(_) => "signature validation failed".to_string(),
            ApiError::Upstream { .. } => "upstream error".to_string(),
            other => other.to_string(),
        }
    }

    /// Server faults are logged; expected client errors are not.
    fn should_log(&self) -> bool {
        matches!(
            self,
            ApiError::Config(_)
                | ApiError::Database(_)
                | ApiError::Redis(_)
                | ApiError::HttpClient(_)
                | ApiError::Json(_)
                | ApiError::Metrics(_)
                | ApiError::Io(_)
                | ApiError::Internal { .. }
                | ApiError::QueueUnavailable
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if self.should_log() {
            error!(error = %self, status = %status, "request failed");
        }

        let envelope = ErrorEnvelope {
            code: self.business_code(),
            message: self.envelope_message(),
            data: self.envelope_data(),
        };

        (status, Json(envelope)).into_response()
    }
}
