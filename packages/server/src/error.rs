use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::RetryRejectionCode;
use sea_orm::DbErr;
use serde::Serialize;

use crate::sms::{RetryRejection, SmsError};

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `TOKEN_MISSING`,
    /// `TOKEN_INVALID`, `PERMISSION_DENIED`, `NOT_FOUND`, `INVALID_ACTION`,
    /// `TOO_LATE`, `COOLDOWN_ACTIVE`, `BAD_GATEWAY`, `INTERNAL_ERROR`.
    #[schema(example = "COOLDOWN_ACTIVE")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "A message for this parcel was sent moments ago")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    PermissionDenied,
    NotFound(String),
    /// The message exists but the requested action does not apply to it.
    InvalidAction(String),
    /// The pickup starts too soon for the action to be useful.
    TooLate(String),
    /// Another message for the same parcel is too recent. Contains seconds until retry is allowed.
    CooldownActive {
        message: String,
        retry_after: u64,
    },
    /// The SMS provider could not be reached.
    Gateway(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::TokenMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_MISSING",
                    message: "Authentication required".into(),
                },
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_INVALID",
                    message: "Invalid or expired token".into(),
                },
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "PERMISSION_DENIED",
                    message: "Insufficient permissions".into(),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::InvalidAction(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "INVALID_ACTION",
                    message: msg,
                },
            ),
            AppError::TooLate(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    code: "TOO_LATE",
                    message: msg,
                },
            ),
            AppError::CooldownActive { message, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorBody {
                    code: "COOLDOWN_ACTIVE",
                    message,
                },
            ),
            AppError::Gateway(detail) => {
                tracing::warn!("Gateway error: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code: "BAD_GATEWAY",
                        message: "The SMS provider could not be reached".into(),
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = if let AppError::CooldownActive { retry_after, .. } = &self {
            Some(*retry_after)
        } else {
            None
        };

        let (status, body) = self.status_and_body();

        if let Some(seconds) = retry_after {
            (status, [("Retry-After", seconds.to_string())], Json(body)).into_response()
        } else {
            (status, Json(body)).into_response()
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<SmsError> for AppError {
    fn from(err: SmsError) -> Self {
        match err {
            SmsError::Gateway(e) => {
                AppError::Gateway(common::redact::redact_phone_numbers(&e.to_string()))
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RetryRejection> for AppError {
    fn from(rejection: RetryRejection) -> Self {
        match rejection.code {
            RetryRejectionCode::NotFound => AppError::NotFound(rejection.message),
            RetryRejectionCode::InvalidAction => AppError::InvalidAction(rejection.message),
            RetryRejectionCode::TooLate => AppError::TooLate(rejection.message),
            RetryRejectionCode::CooldownActive => AppError::CooldownActive {
                message: rejection.message,
                retry_after: rejection.retry_after_secs.unwrap_or(1),
            },
        }
    }
}
