//! Application configuration
//!
//! Built once at process start from the environment and passed into
//! [`crate::state::AppState`]; nothing reads the environment after startup.
//! The signing key lives only inside this value and the codec built from it,
//! and must never be logged (hence no `Debug` derive).

use anyhow::Context;

use authgate_shared::rate_limit::{ClassLimit, RateLimitConfig};

/// Access tokens live two hours by default
const DEFAULT_ACCESS_TTL_SECS: i64 = 2 * 60 * 60;
/// Refresh tokens live seven days by default
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Symmetric signing key for the token codec
    pub jwt_secret: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    pub rate_limits: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        anyhow::ensure!(
            jwt_secret.len() >= 32,
            "JWT_SECRET must be at least 32 bytes"
        );

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let defaults = RateLimitConfig::default();
        let rate_limits = RateLimitConfig {
            login: class_limit_from_env("LOGIN", defaults.login)?,
            refresh: class_limit_from_env("REFRESH", defaults.refresh)?,
            register: class_limit_from_env("REGISTER", defaults.register)?,
            password_reset: class_limit_from_env("PASSWORD_RESET", defaults.password_reset)?,
        };

        Ok(Self {
            database_url,
            bind_address,
            jwt_secret,
            access_ttl_secs: env_i64("ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?,
            refresh_ttl_secs: env_i64("REFRESH_TOKEN_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?,
            rate_limits,
        })
    }
}

fn env_i64(name: &str, default: i64) -> anyhow::Result<i64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}

fn env_u64(name: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("{name} must be an integer")),
        Err(_) => Ok(default),
    }
}

/// Read `RATE_LIMIT_<CLASS>_CAPACITY` / `RATE_LIMIT_<CLASS>_WINDOW_MINUTES`
fn class_limit_from_env(class: &str, default: ClassLimit) -> anyhow::Result<ClassLimit> {
    let capacity = env_u64(
        &format!("RATE_LIMIT_{class}_CAPACITY"),
        u64::from(default.capacity),
    )?;
    let window_minutes = env_u64(
        &format!("RATE_LIMIT_{class}_WINDOW_MINUTES"),
        default.window.as_secs() / 60,
    )?;

    Ok(ClassLimit::new(
        u32::try_from(capacity).context("rate limit capacity out of range")?,
        window_minutes,
    ))
}
