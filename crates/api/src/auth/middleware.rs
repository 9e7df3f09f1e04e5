//! Request gating: session authentication and rate-limit admission
//!
//! The auth gate consults the session store before trusting the signature:
//! logout and forced revocation must take effect immediately, even though the
//! signature alone would keep validating until the embedded expiry. The store
//! answers "is this still a live session"; the signature only proves "we
//! issued this".

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, OriginalUri, Request, State};
use axum::http::header::HeaderMap;
use axum::http::request::Parts;
use axum::http::Extensions;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use uuid::Uuid;

use authgate_shared::rate_limit::{Decision, EndpointClass};

use crate::error::{ApiError, RateLimitError, TokenError};
use crate::state::AppState;

use super::cookies;
use super::jwt::{TokenCodec, TokenKind};
use super::sessions::SessionStore;

/// State needed by the session gate
#[derive(Clone)]
pub struct AuthState {
    pub store: Arc<dyn SessionStore>,
    pub codec: TokenCodec,
}

/// Identity attached to a request after successful validation
///
/// Request-scoped only; never persisted.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub subject: Uuid,
    pub authorities: Vec<String>,
}

/// Middleware gating protected endpoints on a live session
pub async fn require_session(
    State(auth): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = cookies::cookie_value(request.headers(), cookies::ACCESS_COOKIE) else {
        tracing::warn!(path = %path, "Request without a session cookie");
        return reject(TokenError::NoToken);
    };

    // Store lookup first: a signature-valid token that was logged out or
    // force-revoked must already be dead here
    let record = match auth.store.find_access(&token).await {
        Ok(record) => record,
        Err(err) => {
            tracing::error!(path = %path, error = %err, "Session store lookup failed");
            return ApiError::from(err).into_response();
        }
    };
    let Some(record) = record else {
        tracing::warn!(path = %path, "Token has no active session record");
        return reject(TokenError::TokenInactive);
    };

    let now = OffsetDateTime::now_utc();
    if record.is_expired(now) {
        // Lazy cleanup; the periodic sweep would get it eventually
        if let Err(err) = auth.store.delete_access(&token).await {
            tracing::warn!(path = %path, error = %err, "Failed to delete expired session record");
        }
        tracing::warn!(path = %path, account_id = %record.owner_account_id, "Session record expired");
        return reject(TokenError::TokenExpired);
    }

    let claims = match auth.codec.verify_at(&token, now) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::warn!(path = %path, kind = ?err, "Token failed verification");
            return reject(TokenError::TokenInvalid);
        }
    };

    // A refresh token smuggled into the access cookie, or a record that
    // somehow disagrees with the claims, is invalid outright
    if claims.kind != TokenKind::Access || claims.sub != record.owner_account_id {
        tracing::warn!(path = %path, "Token claims do not match the session record");
        return reject(TokenError::TokenInvalid);
    }

    request.extensions_mut().insert(AuthenticatedIdentity {
        subject: claims.sub,
        authorities: claims.authorities,
    });
    next.run(request).await
}

/// Uniform rejection; the precise sub-kind stays in the logs
fn reject(kind: TokenError) -> Response {
    ApiError::from(kind).into_response()
}

/// Rate-limit gate for the login endpoint class
pub async fn gate_login(State(state): State<AppState>, request: Request, next: Next) -> Response {
    gate(EndpointClass::Login, state, request, next).await
}

/// Rate-limit gate for the refresh endpoint class
pub async fn gate_refresh(State(state): State<AppState>, request: Request, next: Next) -> Response {
    gate(EndpointClass::Refresh, state, request, next).await
}

/// Rate-limit gate for the register endpoint class
pub async fn gate_register(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    gate(EndpointClass::Register, state, request, next).await
}

/// Rate-limit gate for the password-reset endpoint class
pub async fn gate_password_reset(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    gate(EndpointClass::PasswordReset, state, request, next).await
}

async fn gate(
    class: EndpointClass,
    state: AppState,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = resolve_client_ip(request.headers(), request.extensions());

    match state.rate_limiter.try_consume(class, &client_ip).await {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after } => {
            tracing::warn!(
                class = class.as_str(),
                client_ip = %client_ip,
                "Rate limit exceeded"
            );
            ApiError::from(RateLimitError::Exceeded {
                retry_after,
                path: request_path(&request),
            })
            .into_response()
        }
    }
}

/// Full request path as the client sent it
///
/// Inside a nested router `uri()` has the nest prefix stripped; the original
/// URI recorded by the router keeps it.
fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| request.uri().path(), |uri| uri.path())
        .to_string()
}

/// Resolve the client IP, preferring the trusted proxy header chain
///
/// `X-Forwarded-For` may list several hops; the first entry is the client.
pub fn resolve_client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|h| h.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("X-Real-IP").and_then(|h| h.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }

    "unknown".to_string()
}

/// Extractor form of [`resolve_client_ip`] for handlers
#[derive(Debug, Clone)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(resolve_client_ip(&parts.headers, &parts.extensions)))
    }
}
