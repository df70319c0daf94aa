use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Application-wide error taxonomy.
///
/// `ReorgDetected` is an internal control signal raised by the Reorg
/// Detector and consumed by the owning Worker; it must never reach an
/// admin-facing response.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimit(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("circuit breaker open: {0}")]
    BreakerOpen(String),

    #[error("reorg detected at block {fork_point}")]
    ReorgDetected { fork_point: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether a retry harness should attempt this call again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_) | AppError::Network(_) | AppError::RateLimit(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::AlreadyExists(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Network(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::RateLimit(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Permanent(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::BreakerOpen(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::ReorgDetected { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Redis(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_rate_limit_transient_are_retriable() {
        assert!(AppError::Transient("x".into()).is_retriable());
        assert!(AppError::Network("x".into()).is_retriable());
        assert!(AppError::RateLimit("x".into()).is_retriable());
        assert!(!AppError::Permanent("x".into()).is_retriable());
        assert!(!AppError::InvalidInput("x".into()).is_retriable());
        assert!(!AppError::BreakerOpen("x".into()).is_retriable());
    }
}
