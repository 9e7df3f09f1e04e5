//! Credential verification boundary
//!
//! The account directory is an external collaborator; this subsystem only
//! consumes a narrow interface for turning an identifier/secret pair into a
//! verified identity, plus an authorities lookup for the refresh path.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, CredentialError};

/// Verified external identity assertion
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub account_id: Uuid,
    pub authorities: Vec<String>,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, identifier: &str, secret: &str) -> Result<VerifiedIdentity, ApiError>;

    /// Current authorities for an already-verified account, used when minting
    /// an access token without re-presenting credentials
    async fn authorities_for(&self, account_id: Uuid) -> Result<Vec<String>, ApiError>;
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    password_hash: String,
    disabled: bool,
    identity_confirmed: bool,
    authorities: Vec<String>,
}

/// Default adapter over the `accounts` table
///
/// Hash verification stays at this boundary; the session core never sees
/// secrets or hashes.
#[derive(Clone)]
pub struct PgCredentialVerifier {
    pool: PgPool,
}

impl PgCredentialVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn verify(&self, identifier: &str, secret: &str) -> Result<VerifiedIdentity, ApiError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, password_hash, disabled, identity_confirmed, authorities
            FROM accounts
            WHERE identifier = $1
            "#,
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

        let Some(account) = row else {
            return Err(CredentialError::InvalidCredentials.into());
        };

        let parsed = PasswordHash::new(&account.password_hash)
            .map_err(|_| ApiError::from(CredentialError::InvalidCredentials))?;
        if Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_err()
        {
            return Err(CredentialError::InvalidCredentials.into());
        }

        if account.disabled {
            return Err(CredentialError::AccountDisabled.into());
        }
        if !account.identity_confirmed {
            return Err(CredentialError::IdentityUnconfirmed.into());
        }

        Ok(VerifiedIdentity {
            account_id: account.id,
            authorities: account.authorities,
        })
    }

    async fn authorities_for(&self, account_id: Uuid) -> Result<Vec<String>, ApiError> {
        let row: Option<(Vec<String>, bool)> =
            sqlx::query_as("SELECT authorities, disabled FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ApiError::Internal(e.to_string()))?;

        match row {
            Some((_, true)) => Err(CredentialError::AccountDisabled.into()),
            Some((authorities, false)) => Ok(authorities),
            None => Err(CredentialError::InvalidCredentials.into()),
        }
    }
}
