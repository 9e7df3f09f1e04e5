//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use authgate_shared::RateLimiter;

use crate::auth::{
    ActivityLog, AuthState, CredentialVerifier, PgActivityLog, PgSessionStore, SessionManager,
    SessionStore, TokenCodec,
};
use crate::config::Config;

/// How often the background sweep purges expired and revoked session records
const SWEEP_INTERVAL_SECS: u64 = 300;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub codec: TokenCodec,
    pub store: Arc<dyn SessionStore>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire the state from explicit collaborators
    ///
    /// Also starts the periodic sweep task for expired/revoked records.
    pub fn new(
        store: Arc<dyn SessionStore>,
        activity: Arc<dyn ActivityLog>,
        credentials: Arc<dyn CredentialVerifier>,
        config: Config,
    ) -> Self {
        let codec = TokenCodec::new(&config.jwt_secret);

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            codec.clone(),
            credentials,
            activity,
            time::Duration::seconds(config.access_ttl_secs),
            time::Duration::seconds(config.refresh_ttl_secs),
        ));

        let rate_limiter = RateLimiter::new(config.rate_limits);
        tracing::info!("Rate limiter initialized");

        // Periodic sweep, independent of the request path
        let sessions_for_sweep = sessions.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.tick().await; // The store starts clean; skip the immediate tick
            loop {
                interval.tick().await;
                if let Err(e) = sessions_for_sweep.sweep().await {
                    tracing::error!(error = %e, "Session sweep failed");
                }
            }
        });
        tracing::info!("Session sweep task started");

        Self {
            config,
            codec,
            store,
            sessions,
            rate_limiter,
        }
    }

    /// Wire the state against Postgres-backed adapters
    pub fn from_pool(pool: PgPool, config: Config, credentials: Arc<dyn CredentialVerifier>) -> Self {
        let store = Arc::new(PgSessionStore::new(pool.clone()));
        let activity = Arc::new(PgActivityLog::new(pool));
        Self::new(store, activity, credentials, config)
    }

    /// Get auth state for the session-gate middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            store: self.store.clone(),
            codec: self.codec.clone(),
        }
    }
}
