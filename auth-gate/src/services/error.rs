use service_core::axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::AppError;
use std::time::Duration;
use thiserror::Error;

use crate::db::{Entity, StoreError};
use crate::services::rate_limiter::Scope;

/// Every outcome the gate can hand back to the request layer.
///
/// All variants are final: nothing in the gate retries on any of them.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Token is malformed or its signature is invalid")]
    TokenMalformed,

    #[error("Token has expired")]
    TokenExpired,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("Identity not found")]
    IdentityNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Permission not found")]
    PermissionNotFound,

    #[error("Identity already has this role")]
    AlreadyHasRole,

    #[error("{0}")]
    Forbidden(String),

    #[error("Too many requests ({scope} rate limit exceeded)")]
    RateLimited { scope: Scope, retry_after: Duration },

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    TwoFactorInvalid,

    #[error("Two-factor authentication is not set up")]
    TwoFactorNotSetup,

    #[error("{0} already exists")]
    DuplicateName(String),

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Email already verified")]
    EmailAlreadyVerified,

    #[error("Invalid verification code")]
    InvalidVerificationCode,

    #[error("Invalid or expired reset code")]
    InvalidResetCode,

    #[error("Reset code expired")]
    ResetCodeExpired,

    #[error(transparent)]
    App(#[from] AppError),
}

impl GateError {
    /// Stable identifier surfaced to clients alongside the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            GateError::TokenMalformed => "token_malformed",
            GateError::TokenExpired => "token_expired",
            GateError::Unauthenticated(_) => "unauthenticated",
            GateError::IdentityNotFound => "identity_not_found",
            GateError::RoleNotFound => "role_not_found",
            GateError::PermissionNotFound => "permission_not_found",
            GateError::AlreadyHasRole => "already_has_role",
            GateError::Forbidden(_) => "forbidden",
            GateError::RateLimited { .. } => "rate_limited",
            GateError::TwoFactorRequired => "two_factor_required",
            GateError::TwoFactorInvalid => "two_factor_invalid",
            GateError::TwoFactorNotSetup => "two_factor_not_setup",
            GateError::DuplicateName(_) => "duplicate_name",
            GateError::EmailAlreadyRegistered => "email_already_registered",
            GateError::InvalidCredentials => "invalid_credentials",
            GateError::EmailNotVerified => "email_not_verified",
            GateError::EmailAlreadyVerified => "email_already_verified",
            GateError::InvalidVerificationCode => "invalid_verification_code",
            GateError::InvalidResetCode => "invalid_reset_code",
            GateError::ResetCodeExpired => "reset_code_expired",
            GateError::App(err) => err.kind(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GateError::TokenMalformed
            | GateError::TokenExpired
            | GateError::Unauthenticated(_)
            | GateError::InvalidCredentials
            | GateError::TwoFactorRequired
            | GateError::TwoFactorInvalid => StatusCode::UNAUTHORIZED,
            GateError::Forbidden(_) | GateError::EmailNotVerified => StatusCode::FORBIDDEN,
            GateError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::IdentityNotFound
            | GateError::RoleNotFound
            | GateError::PermissionNotFound => StatusCode::NOT_FOUND,
            GateError::DuplicateName(_) | GateError::EmailAlreadyRegistered => {
                StatusCode::CONFLICT
            }
            GateError::AlreadyHasRole
            | GateError::TwoFactorNotSetup
            | GateError::EmailAlreadyVerified
            | GateError::InvalidVerificationCode
            | GateError::InvalidResetCode
            | GateError::ResetCodeExpired => StatusCode::BAD_REQUEST,
            GateError::App(AppError::ValidationError(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            GateError::App(AppError::BadRequest(_)) => StatusCode::BAD_REQUEST,
            GateError::App(AppError::ServiceUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::App(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Collapse token and identity failures into the single 401 the pipeline reports.
    pub fn into_unauthenticated(self) -> GateError {
        match self {
            GateError::TokenMalformed => {
                GateError::Unauthenticated("Invalid token".to_string())
            }
            GateError::TokenExpired => GateError::Unauthenticated("Token has expired".to_string()),
            GateError::IdentityNotFound => {
                GateError::Unauthenticated("Identity not found".to_string())
            }
            other => other,
        }
    }
}

impl From<StoreError> for GateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(Entity::Identity) => GateError::IdentityNotFound,
            StoreError::NotFound(Entity::Role) => GateError::RoleNotFound,
            StoreError::NotFound(Entity::Permission) => GateError::PermissionNotFound,
            StoreError::Conflict(msg) => GateError::DuplicateName(msg),
            StoreError::Backend(e) => GateError::App(AppError::InternalError(e)),
        }
    }
}

impl From<anyhow::Error> for GateError {
    fn from(err: anyhow::Error) -> Self {
        GateError::App(AppError::InternalError(err))
    }
}

impl From<validator::ValidationErrors> for GateError {
    fn from(err: validator::ValidationErrors) -> Self {
        GateError::App(AppError::ValidationError(err))
    }
}

#[derive(Debug, serde::Serialize)]
struct GateErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            GateError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        };

        if let GateError::App(err) = self {
            return err.into_response();
        }

        let status = self.status();
        let body = GateErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        let mut response = (status, Json(body)).into_response();

        if let Some(wait) = retry_after {
            // Round up so clients never retry before a token is available.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, secs.max(1).into());
        }

        response
    }
}
