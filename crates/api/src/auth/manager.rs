//! Session lifecycle orchestration
//!
//! Per `(account, device class)` a session moves through
//! `NoSession -> Active -> (Refreshed | LoggedOut | Expired)`, where a refresh
//! rotates both tokens and lands back in `Active`. The manager owns the
//! ordering of codec and store calls that keeps at most one live access
//! record per `(account, device class)` without any cross-request lock.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, RefreshError, StoreError};

use super::activity::{ActivityEvent, ActivityLog};
use super::credentials::CredentialVerifier;
use super::jwt::{TokenCodec, TokenKind};
use super::sessions::{AccessTokenRecord, RefreshTokenRecord, SessionStore};

/// Device class used when the transport does not name one
pub const DEFAULT_DEVICE_CLASS: &str = "WEB";

/// Freshly minted credentials for one session
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    codec: TokenCodec,
    credentials: Arc<dyn CredentialVerifier>,
    activity: Arc<dyn ActivityLog>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        codec: TokenCodec,
        credentials: Arc<dyn CredentialVerifier>,
        activity: Arc<dyn ActivityLog>,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            credentials,
            activity,
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Establish a new session, superseding any prior one for the same
    /// `(account, device class)`
    pub async fn login(
        &self,
        identifier: &str,
        secret: &str,
        device_class: &str,
        client_ip: Option<&str>,
    ) -> ApiResult<TokenPair> {
        let identity = match self.credentials.verify(identifier, secret).await {
            Ok(identity) => identity,
            Err(err) => {
                if matches!(err, ApiError::Credential(_)) {
                    self.activity
                        .record(None, ActivityEvent::LoginFailed, client_ip);
                }
                return Err(err);
            }
        };

        let now = OffsetDateTime::now_utc();
        let access_token = self
            .persist_access(identity.account_id, &identity.authorities, device_class, now)
            .await?;
        let refresh_token = self.persist_refresh(identity.account_id, now).await?;

        tracing::info!(
            account_id = %identity.account_id,
            device_class = %device_class,
            "Session established"
        );
        self.activity.record(
            Some(identity.account_id),
            ActivityEvent::LoginSucceeded,
            client_ip,
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new token pair
    ///
    /// Rotation-on-use: the presented token is revoked and replaced, so a
    /// second presentation of the same value is reuse. Reuse implies the
    /// token leaked, and the response is deliberately heavy: every session
    /// for the owner is torn down.
    pub async fn refresh(
        &self,
        refresh_token_value: &str,
        client_ip: Option<&str>,
    ) -> ApiResult<TokenPair> {
        let now = OffsetDateTime::now_utc();

        let record = self
            .store
            .find_refresh(refresh_token_value)
            .await?
            .ok_or(RefreshError::RefreshTokenMissing)?;
        let owner = record.owner_account_id;

        if record.revoked {
            tracing::warn!(
                account_id = %owner,
                client_ip = ?client_ip,
                "Refresh token reuse detected; revoking all sessions for owner"
            );
            self.activity
                .record(Some(owner), ActivityEvent::RefreshTokenReused, client_ip);
            self.store.revoke_refresh_for_owner(owner).await?;
            self.store.delete_access_for_owner(owner).await?;
            return Err(RefreshError::RefreshTokenReused.into());
        }

        if record.is_expired(now) {
            return Err(RefreshError::RefreshTokenExpired.into());
        }

        let authorities = self.credentials.authorities_for(owner).await?;

        // Revoke before minting replacements: a failure mid-rotation leaves
        // the old token unusable rather than usable twice
        self.store.revoke_refresh(refresh_token_value).await?;
        self.store.delete_access_for_owner(owner).await?;

        let access_token = self
            .persist_access(owner, &authorities, DEFAULT_DEVICE_CLASS, now)
            .await?;
        let refresh_token = self.persist_refresh(owner, now).await?;

        self.activity
            .record(Some(owner), ActivityEvent::TokenRefreshed, client_ip);

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Tear down the session holding `access_token_value`
    ///
    /// Idempotent: a token with no record (already logged out, swept, or
    /// never issued) is not an error.
    pub async fn logout(
        &self,
        access_token_value: &str,
        client_ip: Option<&str>,
    ) -> ApiResult<()> {
        let existing = self.store.find_access(access_token_value).await?;

        if self.store.delete_access(access_token_value).await? {
            if let Some(record) = existing {
                self.activity.record(
                    Some(record.owner_account_id),
                    ActivityEvent::LoggedOut,
                    client_ip,
                );
            }
        }

        Ok(())
    }

    /// Purge expired access records and expired-or-revoked refresh records
    ///
    /// Driven by the periodic sweep task; safe to run concurrently with live
    /// traffic because the store deletes only rows still expired at the time
    /// of the sweep.
    pub async fn sweep(&self) -> ApiResult<u64> {
        let purged = self.store.purge_expired(OffsetDateTime::now_utc()).await?;
        if purged > 0 {
            tracing::info!(purged, "Swept expired session records");
        }
        Ok(purged)
    }

    /// Mint an access token and replace the owner's record for
    /// `device_class`, retrying once with a fresh token value on a
    /// uniqueness collision
    async fn persist_access(
        &self,
        owner: Uuid,
        authorities: &[String],
        device_class: &str,
        now: OffsetDateTime,
    ) -> ApiResult<String> {
        let token = self
            .codec
            .issue(owner, authorities, TokenKind::Access, self.access_ttl)?;

        match self
            .store
            .replace_access(&self.access_record(owner, &token, device_class, now))
            .await
        {
            Ok(()) => Ok(token),
            Err(StoreError::Conflict) => {
                tracing::warn!(
                    account_id = %owner,
                    "Access token value collided; retrying once with a fresh token"
                );
                let token = self
                    .codec
                    .issue(owner, authorities, TokenKind::Access, self.access_ttl)?;
                self.store
                    .replace_access(&self.access_record(owner, &token, device_class, now))
                    .await?;
                Ok(token)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn persist_refresh(&self, owner: Uuid, now: OffsetDateTime) -> ApiResult<String> {
        let token = self
            .codec
            .issue(owner, &[], TokenKind::Refresh, self.refresh_ttl)?;

        match self
            .store
            .insert_refresh(&self.refresh_record(owner, &token, now))
            .await
        {
            Ok(()) => Ok(token),
            Err(StoreError::Conflict) => {
                tracing::warn!(
                    account_id = %owner,
                    "Refresh token value collided; retrying once with a fresh token"
                );
                let token = self
                    .codec
                    .issue(owner, &[], TokenKind::Refresh, self.refresh_ttl)?;
                self.store
                    .insert_refresh(&self.refresh_record(owner, &token, now))
                    .await?;
                Ok(token)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn access_record(
        &self,
        owner: Uuid,
        token: &str,
        device_class: &str,
        now: OffsetDateTime,
    ) -> AccessTokenRecord {
        AccessTokenRecord {
            token_value: token.to_string(),
            owner_account_id: owner,
            issued_at: now,
            expires_at: now + self.access_ttl,
            device_class: device_class.to_string(),
        }
    }

    fn refresh_record(&self, owner: Uuid, token: &str, now: OffsetDateTime) -> RefreshTokenRecord {
        RefreshTokenRecord {
            token_value: token.to_string(),
            owner_account_id: owner,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            revoked: false,
        }
    }
}
