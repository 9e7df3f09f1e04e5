//! Fire-and-forget activity logging
//!
//! Records are written on a spawned task so a slow or failed write never
//! blocks or aborts the auth operation that produced it.

use sqlx::PgPool;
use uuid::Uuid;

/// Auth lifecycle events worth an audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEvent {
    LoginSucceeded,
    LoginFailed,
    TokenRefreshed,
    /// Security-relevant: a consumed refresh token was presented again
    RefreshTokenReused,
    LoggedOut,
}

impl ActivityEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityEvent::LoginSucceeded => "login_succeeded",
            ActivityEvent::LoginFailed => "login_failed",
            ActivityEvent::TokenRefreshed => "token_refreshed",
            ActivityEvent::RefreshTokenReused => "refresh_token_reused",
            ActivityEvent::LoggedOut => "logged_out",
        }
    }
}

pub trait ActivityLog: Send + Sync {
    /// Record an event; must never block or fail the calling operation
    fn record(&self, account_id: Option<Uuid>, event: ActivityEvent, client_ip: Option<&str>);
}

/// Postgres-backed activity log
#[derive(Clone)]
pub struct PgActivityLog {
    pool: PgPool,
}

impl PgActivityLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ActivityLog for PgActivityLog {
    fn record(&self, account_id: Option<Uuid>, event: ActivityEvent, client_ip: Option<&str>) {
        let pool = self.pool.clone();
        let client_ip = client_ip.map(String::from);

        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO auth_activity_log (account_id, event_kind, client_ip, created_at)
                VALUES ($1, $2, $3, NOW())
                "#,
            )
            .bind(account_id)
            .bind(event.as_str())
            .bind(client_ip)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(event = event.as_str(), error = %e, "Failed to record activity event");
            }
        });
    }
}

/// Activity log that drops every event
///
/// Used by tests and by deployments that rely on tracing output alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopActivityLog;

impl ActivityLog for NoopActivityLog {
    fn record(&self, _account_id: Option<Uuid>, _event: ActivityEvent, _client_ip: Option<&str>) {}
}
