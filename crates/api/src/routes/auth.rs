//! Auth endpoint handlers
//!
//! Handlers translate between the cookie wire contract and the opaque token
//! strings the session manager works with; no cookie knowledge leaks below
//! this layer.

use axum::extract::State;
use axum::http::header::{HeaderMap, SET_COOKIE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::cookies::{self, ACCESS_COOKIE, REFRESH_COOKIE};
use crate::auth::{AuthenticatedIdentity, ClientIp, TokenPair, DEFAULT_DEVICE_CLASS};
use crate::error::{ApiError, ApiResult, RefreshError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
    #[serde(default = "default_device_class")]
    pub device_class: String,
}

fn default_device_class() -> String {
    DEFAULT_DEVICE_CLASS.to_string()
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    /// Access token lifetime in seconds, mirroring the cookie max-age
    pub expires_in: i64,
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    Json(body): Json<LoginRequest>,
) -> ApiResult<Response> {
    let pair = state
        .sessions
        .login(
            &body.identifier,
            &body.secret,
            &body.device_class,
            Some(&client_ip),
        )
        .await?;

    session_response(&state, &pair)
}

/// POST /api/v1/auth/refresh
///
/// The refresh token travels in its cookie; an absent cookie is treated the
/// same as an unknown token.
pub async fn refresh(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let token = cookies::cookie_value(&headers, REFRESH_COOKIE)
        .ok_or(RefreshError::RefreshTokenMissing)?;

    let pair = state.sessions.refresh(&token, Some(&client_ip)).await?;

    session_response(&state, &pair)
}

/// POST /api/v1/auth/logout
///
/// Idempotent: clears both cookies whether or not a session record existed.
pub async fn logout(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if let Some(token) = cookies::cookie_value(&headers, ACCESS_COOKIE) {
        state.sessions.logout(&token, Some(&client_ip)).await?;
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookie(&mut response, &cookies::clear_cookie(ACCESS_COOKIE))?;
    append_cookie(&mut response, &cookies::clear_cookie(REFRESH_COOKIE))?;
    Ok(response)
}

/// GET /api/v1/auth/me, the protected surface behind the session gate
pub async fn me(Extension(identity): Extension<AuthenticatedIdentity>) -> Json<serde_json::Value> {
    Json(json!({
        "subject": identity.subject,
        "authorities": identity.authorities,
    }))
}

/// 200 response (re)setting both token cookies
fn session_response(state: &AppState, pair: &TokenPair) -> ApiResult<Response> {
    let body = Json(SessionResponse {
        expires_in: state.config.access_ttl_secs,
    });

    let mut response = (StatusCode::OK, body).into_response();
    append_cookie(
        &mut response,
        &cookies::set_cookie(ACCESS_COOKIE, &pair.access_token, state.config.access_ttl_secs),
    )?;
    append_cookie(
        &mut response,
        &cookies::set_cookie(
            REFRESH_COOKIE,
            &pair.refresh_token,
            state.config.refresh_ttl_secs,
        ),
    )?;
    Ok(response)
}

fn append_cookie(response: &mut Response, cookie: &str) -> Result<(), ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| ApiError::Internal("cookie value not header-safe".to_string()))?;
    response.headers_mut().append(SET_COOKIE, value);
    Ok(())
}
