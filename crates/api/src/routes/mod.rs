//! HTTP routing

pub mod auth;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::auth::{gate_login, gate_refresh, require_session};
use crate::state::AppState;

/// Build the application router
///
/// The credential-issuing endpoints sit behind their rate-limit gates;
/// protected endpoints sit behind the session gate. Logout is deliberately
/// ungated so that a second logout with an already-dead token still succeeds.
pub fn create_router(state: AppState) -> Router {
    let login = Router::new()
        .route("/login", post(auth::login))
        .layer(middleware::from_fn_with_state(state.clone(), gate_login));

    let refresh = Router::new()
        .route("/refresh", post(auth::refresh))
        .layer(middleware::from_fn_with_state(state.clone(), gate_refresh));

    let open = Router::new().route("/logout", post(auth::logout));

    let protected = Router::new().route("/me", get(auth::me)).layer(
        middleware::from_fn_with_state(state.auth_state(), require_session),
    );

    Router::new()
        .nest(
            "/api/v1/auth",
            login.merge(refresh).merge(open).merge(protected),
        )
        .with_state(state)
}
