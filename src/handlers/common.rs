use crate::{errors::ServiceError, ApiResponse};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input
        .validate()
        .map_err(|e| ServiceError::ValidationError(format!("Validation failed: {}", e)))
}

/// Limit for list endpoints
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct LimitParams {
    /// Maximum rows to return (default 50, capped at 500)
    #[param(minimum = 1, maximum = 500)]
    pub limit: Option<u64>,
}

impl LimitParams {
    pub const DEFAULT: u64 = 50;
    pub const MAX: u64 = 500;

    pub fn resolved(&self) -> u64 {
        self.limit.unwrap_or(Self::DEFAULT).clamp(1, Self::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped() {
        assert_eq!(LimitParams { limit: None }.resolved(), 50);
        assert_eq!(LimitParams { limit: Some(0) }.resolved(), 1);
        assert_eq!(LimitParams { limit: Some(10_000) }.resolved(), 500);
    }
}
