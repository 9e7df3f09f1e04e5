//! Cookie encoding and decoding for the token transport
//!
//! The wire contract carries both tokens in `HttpOnly` cookies. All cookie
//! handling lives here; the session core and the manager only ever see the
//! opaque token strings.

use axum::http::header::{HeaderMap, COOKIE};

pub const ACCESS_COOKIE: &str = "authgate_access_token";
pub const REFRESH_COOKIE: &str = "authgate_refresh_token";

/// Extract a named cookie value from the request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    for cookie in cookies.split(';') {
        let cookie = cookie.trim();
        if let Some(value) = cookie.strip_prefix(name) {
            if let Some(value) = value.strip_prefix('=') {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// `Set-Cookie` value installing a token for `max_age_secs`
pub fn set_cookie(name: &str, value: &str, max_age_secs: i64) -> String {
    format!("{name}={value}; HttpOnly; Path=/; SameSite=Lax; Max-Age={max_age_secs}")
}

/// `Set-Cookie` value clearing a token immediately
pub fn clear_cookie(name: &str) -> String {
    format!("{name}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0")
}
