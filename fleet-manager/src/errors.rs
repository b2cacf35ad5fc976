use crate::db::errors::DbError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

pub const ERROR_CODE_PREFIX: &str = "FLEET-MGMT";

/// Stable, numbered error codes exposed to API consumers and used by the reconcilers to decide
/// whether a failure is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MaxAllowedInstanceReached,
    NotFound,
    Validation,
    General,
    Unauthorized,
    BadRequest,
    FailedToCreateSsoClient,
    InsufficientQuota,
    FailedToCheckQuota,
    InvalidBillingAccount,
}

impl ErrorCode {
    pub fn code(&self) -> u32 {
        match self {
            ErrorCode::MaxAllowedInstanceReached => 5,
            ErrorCode::NotFound => 7,
            ErrorCode::Validation => 8,
            ErrorCode::General => 9,
            ErrorCode::Unauthorized => 11,
            ErrorCode::BadRequest => 21,
            ErrorCode::FailedToCreateSsoClient => 106,
            ErrorCode::InsufficientQuota => 120,
            ErrorCode::FailedToCheckQuota => 121,
            ErrorCode::InvalidBillingAccount => 123,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::MaxAllowedInstanceReached | ErrorCode::InsufficientQuota => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Validation | ErrorCode::BadRequest | ErrorCode::InvalidBillingAccount => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::General | ErrorCode::FailedToCreateSsoClient | ErrorCode::FailedToCheckQuota => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Reason used when a caller does not supply one
    pub fn default_reason(&self) -> &'static str {
        match self {
            ErrorCode::MaxAllowedInstanceReached => "Forbidden to create more instances than the maximum allowed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::Validation => "General validation failure",
            ErrorCode::General => "Unspecified error",
            ErrorCode::Unauthorized => "Account is unauthorized to perform this action",
            ErrorCode::BadRequest => "Bad request",
            ErrorCode::FailedToCreateSsoClient => "Failed to create kafka client in the mas sso",
            ErrorCode::InsufficientQuota => "Insufficient quota",
            ErrorCode::FailedToCheckQuota => "Failed to check quota",
            ErrorCode::InvalidBillingAccount => "Billing account id missing or invalid",
        }
    }

    /// e.g. `FLEET-MGMT-120`
    pub fn code_str(&self) -> String {
        format!("{ERROR_CODE_PREFIX}-{}", self.code())
    }
}

/// Error returned by quota services, billing-model resolvers and the preparation step.
#[derive(ThisError, Debug)]
#[error("{}: {}", .code.code_str(), .reason)]
pub struct ServiceError {
    pub code: ErrorCode,
    pub reason: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let reason = if reason.is_empty() { code.default_reason().to_string() } else { reason };
        Self { code, reason, cause: None }
    }

    pub fn with_cause(code: ErrorCode, cause: impl Into<anyhow::Error>, reason: impl Into<String>) -> Self {
        let cause: anyhow::Error = cause.into();
        Self {
            cause: Some(cause.into()),
            ..Self::new(code, reason)
        }
    }

    pub fn general(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::General, reason)
    }

    pub fn general_with_cause(cause: impl Into<anyhow::Error>, reason: impl Into<String>) -> Self {
        Self::with_cause(ErrorCode::General, cause, reason)
    }

    pub fn insufficient_quota(reason: impl AsRef<str>) -> Self {
        Self::new(
            ErrorCode::InsufficientQuota,
            format!("{}: {}", ErrorCode::InsufficientQuota.default_reason(), reason.as_ref()),
        )
    }

    pub fn max_allowed_instance_reached(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::MaxAllowedInstanceReached, reason)
    }

    pub fn invalid_billing_account(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidBillingAccount, reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, reason)
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, reason)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, reason)
    }

    pub fn failed_to_create_sso_client(cause: impl Into<anyhow::Error>, reason: impl Into<String>) -> Self {
        Self::with_cause(ErrorCode::FailedToCreateSsoClient, cause, reason)
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_insufficient_quota(&self) -> bool {
        self.code == ErrorCode::InsufficientQuota
    }

    pub fn is_client_error_class(&self) -> bool {
        self.status_code().is_client_error()
    }

    pub fn is_server_error_class(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        if self.is_server_error_class() {
            self.code.default_reason().to_string()
        } else {
            self.reason.clone()
        }
    }
}

impl From<DbError> for ServiceError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ServiceError::not_found(""),
            other => ServiceError::general_with_cause(anyhow::Error::from(other), "database operation failed"),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.is_server_error_class() {
            tracing::error!("Internal service error: {:#}", self);
        } else {
            tracing::debug!("Client error: {}", self);
        }

        let body = json!({
            "kind": "Error",
            "code": self.code.code_str(),
            "reason": self.user_message(),
        });
        (self.status_code(), axum::response::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_quota_is_prefixed_and_forbidden() {
        let err = ServiceError::insufficient_quota("unable to resolve billing model");
        assert_eq!(err.reason, "Insufficient quota: unable to resolve billing model");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.code.code(), 120);
        assert!(err.is_client_error_class());
        assert!(!err.is_server_error_class());
        assert!(err.is_insufficient_quota());
    }

    #[test]
    fn empty_reason_falls_back_to_default() {
        let err = ServiceError::general("");
        assert_eq!(err.reason, "Unspecified error");
        assert_eq!(err.to_string(), "FLEET-MGMT-9: Unspecified error");
    }

    #[test]
    fn server_errors_hide_their_reason_from_users() {
        let err = ServiceError::general_with_cause(anyhow::anyhow!("connection refused"), "Error reserving quota");
        assert!(err.is_server_error_class());
        assert_eq!(err.user_message(), "Unspecified error");
        assert!(err.cause().is_some());

        let err = ServiceError::max_allowed_instance_reached("User 'u' has reached a maximum number of 1 allowed instances.");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.user_message(), "User 'u' has reached a maximum number of 1 allowed instances.");
    }

    #[test]
    fn db_not_found_maps_to_not_found() {
        let err: ServiceError = DbError::NotFound.into();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
