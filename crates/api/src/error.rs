//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::IssuanceError;
use outbox::DeadLetterError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Coupon issuance error.
    Issuance(IssuanceError),
    /// Dead-letter store error.
    DeadLetter(DeadLetterError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Issuance(err) => issuance_error_to_response(err),
            ApiError::DeadLetter(err) => dead_letter_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, %status, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn issuance_error_to_response(err: IssuanceError) -> (StatusCode, String) {
    let status = match &err {
        IssuanceError::CouponNotFound(_) => StatusCode::NOT_FOUND,
        IssuanceError::CouponExhausted { .. } | IssuanceError::DuplicateIssuance { .. } => {
            StatusCode::CONFLICT
        }
        IssuanceError::CouponExpired { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        IssuanceError::InvalidCoupon(_) => StatusCode::BAD_REQUEST,
        IssuanceError::VersionConflict { .. } | IssuanceError::Lock(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        IssuanceError::Repository(_) | IssuanceError::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

fn dead_letter_error_to_response(err: DeadLetterError) -> (StatusCode, String) {
    let status = match &err {
        DeadLetterError::NotFound(_) => StatusCode::NOT_FOUND,
        DeadLetterError::InvalidTransition { .. } => StatusCode::CONFLICT,
        DeadLetterError::UnknownStatus(_) => StatusCode::BAD_REQUEST,
        DeadLetterError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<IssuanceError> for ApiError {
    fn from(err: IssuanceError) -> Self {
        ApiError::Issuance(err)
    }
}

impl From<DeadLetterError> for ApiError {
    fn from(err: DeadLetterError) -> Self {
        ApiError::DeadLetter(err)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{CouponId, UserId};
    use coordination::LockError;

    use super::*;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_issuance_status_codes() {
        let coupon_id = CouponId::new();
        assert_eq!(
            status_of(IssuanceError::CouponNotFound(coupon_id)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(IssuanceError::CouponExhausted {
                coupon_id,
                total_quantity: 5
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(IssuanceError::DuplicateIssuance {
                coupon_id,
                user_id: UserId::new(),
                existing: None,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(IssuanceError::Lock(LockError::LeaseExpired {
                key: "coupon:1".to_string(),
                ttl: Duration::from_secs(10),
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_dead_letter_status_codes() {
        assert_eq!(
            status_of(DeadLetterError::NotFound(9)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DeadLetterError::InvalidTransition {
                id: 9,
                status: outbox::DeadLetterStatus::Ignored,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(DeadLetterError::UnknownStatus("LOST".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
