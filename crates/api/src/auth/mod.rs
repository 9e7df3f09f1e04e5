//! Session-token lifecycle and request gating

pub mod activity;
pub mod cookies;
pub mod credentials;
#[cfg(test)]
mod edge_case_tests;
pub mod jwt;
pub mod manager;
pub mod middleware;
pub mod sessions;

pub use activity::{ActivityEvent, ActivityLog, NoopActivityLog, PgActivityLog};
pub use credentials::{CredentialVerifier, PgCredentialVerifier, VerifiedIdentity};
pub use jwt::{Claims, TokenCodec, TokenCodecError, TokenKind};
pub use manager::{SessionManager, TokenPair, DEFAULT_DEVICE_CLASS};
pub use middleware::{
    gate_login, gate_password_reset, gate_refresh, gate_register, require_session,
    AuthState, AuthenticatedIdentity, ClientIp,
};
pub use sessions::{
    AccessTokenRecord, InMemorySessionStore, PgSessionStore, RefreshTokenRecord, SessionStore,
};
