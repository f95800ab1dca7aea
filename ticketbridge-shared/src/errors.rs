use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Stable error kinds surfaced to webhook providers and operators.
///
/// The string form of each kind (see [`ErrorCode::kind`]) is contractual: it
/// appears in API error bodies, audit log lines, and the
/// `webhook_errors_total{kind}` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Admission
    InvalidSignature,
    InvalidPayload,
    RequestTooLarge,
    RateLimited,
    Unauthorized,

    // Idempotency
    DuplicateInFlight,
    AlreadyProcessed,

    // Sync
    MappingMissing,
    MappingOrphaned,

    // Outbound
    UpstreamTransient,
    UpstreamPermanent,
    Timeout,

    // Everything else
    Internal,
}

impl ErrorCode {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::InvalidPayload => "invalid_payload",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::DuplicateInFlight => "duplicate_in_flight",
            Self::AlreadyProcessed => "already_processed",
            Self::MappingMissing => "mapping_missing",
            Self::MappingOrphaned => "mapping_orphaned",
            Self::UpstreamTransient => "upstream_transient",
            Self::UpstreamPermanent => "upstream_permanent",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidSignature => StatusCode::FORBIDDEN,
            Self::InvalidPayload => StatusCode::BAD_REQUEST,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            // Duplicates are a success from the provider's point of view:
            // anything else triggers a redelivery storm.
            Self::DuplicateInFlight | Self::AlreadyProcessed => StatusCode::ACCEPTED,
            Self::MappingMissing => StatusCode::NOT_FOUND,
            Self::MappingOrphaned => StatusCode::CONFLICT,
            Self::UpstreamTransient | Self::UpstreamPermanent => StatusCode::BAD_GATEWAY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPayload, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// The taxonomy kind for this error, used in logs and metric labels.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Known { code, .. } => *code,
            Self::Internal(_) | Self::Database(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.kind(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("internal", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("internal", "database error"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_snake_case_and_distinct() {
        let all = [
            ErrorCode::InvalidSignature,
            ErrorCode::InvalidPayload,
            ErrorCode::RequestTooLarge,
            ErrorCode::RateLimited,
            ErrorCode::Unauthorized,
            ErrorCode::DuplicateInFlight,
            ErrorCode::AlreadyProcessed,
            ErrorCode::MappingMissing,
            ErrorCode::MappingOrphaned,
            ErrorCode::UpstreamTransient,
            ErrorCode::UpstreamPermanent,
            ErrorCode::Timeout,
            ErrorCode::Internal,
        ];
        let mut seen = std::collections::HashSet::new();
        for code in all {
            assert!(seen.insert(code.kind()), "duplicate kind {}", code.kind());
            assert!(!code.kind().contains(char::is_uppercase));
        }
    }

    #[test]
    fn admission_errors_map_to_provider_statuses() {
        assert_eq!(ErrorCode::InvalidSignature.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::InvalidPayload.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::RequestTooLarge.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(ErrorCode::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn duplicates_answer_accepted() {
        assert_eq!(ErrorCode::DuplicateInFlight.status_code(), StatusCode::ACCEPTED);
        assert_eq!(ErrorCode::AlreadyProcessed.status_code(), StatusCode::ACCEPTED);
    }
}
