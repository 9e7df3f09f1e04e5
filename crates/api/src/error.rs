//! Error taxonomy and the single HTTP mapping
//!
//! Failure classes are closed enums, one per concern. The translation to a
//! wire response happens exactly once, in [`ApiError::into_response`]; no
//! handler inspects error kinds by string.

use std::time::Duration;

use axum::http::{header::RETRY_AFTER, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

/// Failures while verifying an identifier/secret pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account is disabled")]
    AccountDisabled,
    #[error("identity has not been confirmed")]
    IdentityUnconfirmed,
}

/// Failures while gating a protected request
///
/// The sub-kind is logged server-side but the caller always receives a
/// uniform "not authenticated" message, so failed guesses reveal nothing
/// about why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("no token presented")]
    NoToken,
    #[error("token is not an active session")]
    TokenInactive,
    #[error("token is expired")]
    TokenExpired,
    #[error("token is invalid")]
    TokenInvalid,
}

impl TokenError {
    /// Wire code for the response body
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::NoToken => "NO_TOKEN",
            TokenError::TokenInactive => "TOKEN_INACTIVE",
            TokenError::TokenExpired => "TOKEN_EXPIRED",
            TokenError::TokenInvalid => "INVALID_TOKEN",
        }
    }
}

/// Failures while exchanging a refresh token
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("refresh token not found")]
    RefreshTokenMissing,
    #[error("refresh token is expired")]
    RefreshTokenExpired,
    /// A revoked token was presented again. Loud by design: reuse of a
    /// consumed refresh token signals probable credential theft.
    #[error("refresh token has already been used")]
    RefreshTokenReused,
}

/// Admission rejection from the rate limiter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded for {path}")]
    Exceeded { retry_after: Duration, path: String },
}

/// Failures from the session persistence layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness violation on token value; the caller may retry once with a
    /// freshly minted token
    #[error("duplicate token value")]
    Conflict,
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return StoreError::Conflict;
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

/// Top-level error for the auth subsystem
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::RateLimit(RateLimitError::Exceeded { retry_after, path }) = &self {
            return rate_limited_response(*retry_after, path);
        }

        let (status, error, code, message) = match &self {
            ApiError::Credential(CredentialError::InvalidCredentials) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "INVALID_CREDENTIALS",
                "Authentication failed",
            ),
            ApiError::Credential(CredentialError::AccountDisabled) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "ACCOUNT_DISABLED",
                "This account has been disabled",
            ),
            ApiError::Credential(CredentialError::IdentityUnconfirmed) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "IDENTITY_UNCONFIRMED",
                "This identity has not been confirmed",
            ),
            // Absence of a token is forbidden outright; every other token
            // failure is a uniform "not authenticated"
            ApiError::Token(TokenError::NoToken) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                TokenError::NoToken.code(),
                "Not authenticated",
            ),
            ApiError::Token(kind) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                kind.code(),
                "Not authenticated",
            ),
            ApiError::Refresh(RefreshError::RefreshTokenMissing) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "REFRESH_TOKEN_MISSING",
                "Session could not be refreshed",
            ),
            ApiError::Refresh(RefreshError::RefreshTokenExpired) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "REFRESH_TOKEN_EXPIRED",
                "Session could not be refreshed",
            ),
            ApiError::Refresh(RefreshError::RefreshTokenReused) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHENTICATED",
                "REFRESH_TOKEN_REUSED",
                "Session could not be refreshed",
            ),
            ApiError::RateLimit(_) => unreachable!("handled above"),
            ApiError::Store(_) | ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                "INTERNAL_ERROR",
                "Internal server error",
            ),
        };

        let body = Json(json!({
            "message": message,
            "error": error,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// 429 response with a `Retry-After` hint equal to the remaining window
fn rate_limited_response(retry_after: Duration, path: &str) -> Response {
    // Round up so a sub-second remainder never advertises an instant retry
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);

    let body = Json(json!({
        "message": "Too many requests, slow down",
        "error": "RATE_LIMIT_EXCEEDED",
        "path": path,
    }));

    let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
    response
}
