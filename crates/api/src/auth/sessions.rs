//! Durable record of currently-valid access and refresh tokens
//!
//! The store, not the token signature, is the source of truth for whether a
//! session is live: logout and forced revocation take effect by removing or
//! revoking rows here, long before the embedded expiry would lapse.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

/// One issued, currently-trusted access token
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccessTokenRecord {
    /// Opaque signed token string, unique across the table
    pub token_value: String,
    /// Back-reference to the owning account; the account itself is not owned
    /// by this subsystem
    pub owner_account_id: Uuid,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Scopes the one-active-session invariant, e.g. "WEB"
    pub device_class: String,
}

impl AccessTokenRecord {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Longer-lived credential used solely to mint new access tokens
///
/// Rotated tokens are marked revoked rather than deleted so that a replay of
/// a consumed token is detectable; a periodic sweep purges them physically.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub token_value: String,
    pub owner_account_id: Uuid,
    pub issued_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub revoked: bool,
}

impl RefreshTokenRecord {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}

/// Persistence interface for session records
///
/// Implementations must be safe under concurrent access from many request
/// workers; none of the operations assume a cross-request lock.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Delete any access record for the record's `(owner, device_class)` and
    /// insert the new one, as one logical operation. Fails with
    /// [`StoreError::Conflict`] if the token value already exists.
    async fn replace_access(&self, record: &AccessTokenRecord) -> Result<(), StoreError>;

    async fn find_access(&self, token_value: &str) -> Result<Option<AccessTokenRecord>, StoreError>;

    /// Delete by value; returns whether a record existed
    async fn delete_access(&self, token_value: &str) -> Result<bool, StoreError>;

    /// Delete every access record owned by `owner`, across device classes
    async fn delete_access_for_owner(&self, owner: Uuid) -> Result<u64, StoreError>;

    async fn insert_refresh(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_refresh(&self, token_value: &str)
        -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Mark a refresh token revoked; returns whether a record existed
    async fn revoke_refresh(&self, token_value: &str) -> Result<bool, StoreError>;

    async fn revoke_refresh_for_owner(&self, owner: Uuid) -> Result<u64, StoreError>;

    /// Purge expired access records and expired-or-revoked refresh records.
    ///
    /// Deletion is conditional on the row still being expired at `now`, so a
    /// session extended concurrently with the sweep is never removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
}

/// Postgres-backed session store
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn replace_access(&self, record: &AccessTokenRecord) -> Result<(), StoreError> {
        // Delete-then-insert in one transaction keeps the one-record-per-
        // (owner, device) invariant across concurrent logins
        let mut tx = self.pool.begin().await.map_err(StoreError::from)?;

        sqlx::query(
            "DELETE FROM session_access_tokens WHERE owner_account_id = $1 AND device_class = $2",
        )
        .bind(record.owner_account_id)
        .bind(&record.device_class)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        sqlx::query(
            r#"
            INSERT INTO session_access_tokens
                (token_value, owner_account_id, issued_at, expires_at, device_class)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.token_value)
        .bind(record.owner_account_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(&record.device_class)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::from)?;

        tx.commit().await.map_err(StoreError::from)
    }

    async fn find_access(
        &self,
        token_value: &str,
    ) -> Result<Option<AccessTokenRecord>, StoreError> {
        let record = sqlx::query_as::<_, AccessTokenRecord>(
            r#"
            SELECT token_value, owner_account_id, issued_at, expires_at, device_class
            FROM session_access_tokens
            WHERE token_value = $1
            "#,
        )
        .bind(token_value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn delete_access(&self, token_value: &str) -> Result<bool, StoreError> {
        let rows = sqlx::query("DELETE FROM session_access_tokens WHERE token_value = $1")
            .bind(token_value)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows > 0)
    }

    async fn delete_access_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let rows = sqlx::query("DELETE FROM session_access_tokens WHERE owner_account_id = $1")
            .bind(owner)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(rows)
    }

    async fn insert_refresh(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_refresh_tokens
                (token_value, owner_account_id, issued_at, expires_at, revoked)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.token_value)
        .bind(record.owner_account_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(record.revoked)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_refresh(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT token_value, owner_account_id, issued_at, expires_at, revoked
            FROM session_refresh_tokens
            WHERE token_value = $1
            "#,
        )
        .bind(token_value)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn revoke_refresh(&self, token_value: &str) -> Result<bool, StoreError> {
        let rows = sqlx::query(
            "UPDATE session_refresh_tokens SET revoked = TRUE WHERE token_value = $1",
        )
        .bind(token_value)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }

    async fn revoke_refresh_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE session_refresh_tokens
            SET revoked = TRUE
            WHERE owner_account_id = $1
              AND revoked = FALSE
            "#,
        )
        .bind(owner)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let refresh = sqlx::query(
            "DELETE FROM session_refresh_tokens WHERE expires_at <= $1 OR revoked = TRUE",
        )
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let access = sqlx::query("DELETE FROM session_access_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(refresh + access)
    }
}

/// In-memory session store
///
/// Backs the test suites; also usable for single-node development setups
/// where persistence across restarts does not matter.
#[derive(Default)]
pub struct InMemorySessionStore {
    access: RwLock<HashMap<String, AccessTokenRecord>>,
    refresh: RwLock<HashMap<String, RefreshTokenRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live access records for `(owner, device_class)`
    pub async fn access_count_for_device(&self, owner: Uuid, device_class: &str) -> usize {
        self.access
            .read()
            .await
            .values()
            .filter(|r| r.owner_account_id == owner && r.device_class == device_class)
            .count()
    }

    pub async fn access_len(&self) -> usize {
        self.access.read().await.len()
    }

    pub async fn refresh_len(&self) -> usize {
        self.refresh.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn replace_access(&self, record: &AccessTokenRecord) -> Result<(), StoreError> {
        let mut access = self.access.write().await;
        if access.contains_key(&record.token_value) {
            return Err(StoreError::Conflict);
        }
        access.retain(|_, r| {
            !(r.owner_account_id == record.owner_account_id
                && r.device_class == record.device_class)
        });
        access.insert(record.token_value.clone(), record.clone());
        Ok(())
    }

    async fn find_access(
        &self,
        token_value: &str,
    ) -> Result<Option<AccessTokenRecord>, StoreError> {
        Ok(self.access.read().await.get(token_value).cloned())
    }

    async fn delete_access(&self, token_value: &str) -> Result<bool, StoreError> {
        Ok(self.access.write().await.remove(token_value).is_some())
    }

    async fn delete_access_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let mut access = self.access.write().await;
        let before = access.len();
        access.retain(|_, r| r.owner_account_id != owner);
        Ok((before - access.len()) as u64)
    }

    async fn insert_refresh(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut refresh = self.refresh.write().await;
        if refresh.contains_key(&record.token_value) {
            return Err(StoreError::Conflict);
        }
        refresh.insert(record.token_value.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.refresh.read().await.get(token_value).cloned())
    }

    async fn revoke_refresh(&self, token_value: &str) -> Result<bool, StoreError> {
        match self.refresh.write().await.get_mut(token_value) {
            Some(record) => {
                record.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn revoke_refresh_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        let mut refresh = self.refresh.write().await;
        let mut revoked = 0;
        for record in refresh.values_mut() {
            if record.owner_account_id == owner && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut purged = 0;

        {
            let mut refresh = self.refresh.write().await;
            let before = refresh.len();
            refresh.retain(|_, r| !r.is_expired(now) && !r.revoked);
            purged += (before - refresh.len()) as u64;
        }
        {
            let mut access = self.access.write().await;
            let before = access.len();
            access.retain(|_, r| !r.is_expired(now));
            purged += (before - access.len()) as u64;
        }

        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn access_record(owner: Uuid, value: &str, device: &str, ttl: Duration) -> AccessTokenRecord {
        let now = OffsetDateTime::now_utc();
        AccessTokenRecord {
            token_value: value.to_string(),
            owner_account_id: owner,
            issued_at: now,
            expires_at: now + ttl,
            device_class: device.to_string(),
        }
    }

    fn refresh_record(owner: Uuid, value: &str, ttl: Duration) -> RefreshTokenRecord {
        let now = OffsetDateTime::now_utc();
        RefreshTokenRecord {
            token_value: value.to_string(),
            owner_account_id: owner,
            issued_at: now,
            expires_at: now + ttl,
            revoked: false,
        }
    }

    #[tokio::test]
    async fn replace_access_supersedes_same_owner_and_device() {
        let store = InMemorySessionStore::new();
        let owner = Uuid::new_v4();

        store
            .replace_access(&access_record(owner, "tok-1", "WEB", Duration::hours(2)))
            .await
            .unwrap();
        store
            .replace_access(&access_record(owner, "tok-2", "WEB", Duration::hours(2)))
            .await
            .unwrap();

        assert_eq!(store.access_count_for_device(owner, "WEB").await, 1);
        assert!(store.find_access("tok-1").await.unwrap().is_none());
        assert!(store.find_access("tok-2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replace_access_keeps_other_device_classes() {
        let store = InMemorySessionStore::new();
        let owner = Uuid::new_v4();

        store
            .replace_access(&access_record(owner, "tok-web", "WEB", Duration::hours(2)))
            .await
            .unwrap();
        store
            .replace_access(&access_record(owner, "tok-mob", "MOBILE", Duration::hours(2)))
            .await
            .unwrap();

        assert_eq!(store.access_len().await, 2);
    }

    #[tokio::test]
    async fn duplicate_token_value_is_a_conflict() {
        let store = InMemorySessionStore::new();

        store
            .replace_access(&access_record(Uuid::new_v4(), "dup", "WEB", Duration::hours(2)))
            .await
            .unwrap();
        let err = store
            .replace_access(&access_record(Uuid::new_v4(), "dup", "WEB", Duration::hours(2)))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn purge_removes_expired_and_revoked_only() {
        let store = InMemorySessionStore::new();
        let owner = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();

        store
            .replace_access(&access_record(owner, "live", "WEB", Duration::hours(2)))
            .await
            .unwrap();
        store
            .insert_refresh(&refresh_record(owner, "r-live", Duration::days(7)))
            .await
            .unwrap();
        store
            .insert_refresh(&refresh_record(owner, "r-old", Duration::seconds(-5)))
            .await
            .unwrap();
        store
            .insert_refresh(&refresh_record(owner, "r-revoked", Duration::days(7)))
            .await
            .unwrap();
        store.revoke_refresh("r-revoked").await.unwrap();

        let purged = store.purge_expired(now).await.unwrap();

        assert_eq!(purged, 2);
        assert!(store.find_refresh("r-live").await.unwrap().is_some());
        assert!(store.find_refresh("r-old").await.unwrap().is_none());
        assert!(store.find_refresh("r-revoked").await.unwrap().is_none());
        assert!(store.find_access("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revoke_for_owner_leaves_other_owners_untouched() {
        let store = InMemorySessionStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        store
            .insert_refresh(&refresh_record(alice, "r-alice", Duration::days(7)))
            .await
            .unwrap();
        store
            .insert_refresh(&refresh_record(bob, "r-bob", Duration::days(7)))
            .await
            .unwrap();

        let revoked = store.revoke_refresh_for_owner(alice).await.unwrap();

        assert_eq!(revoked, 1);
        assert!(store.find_refresh("r-alice").await.unwrap().unwrap().revoked);
        assert!(!store.find_refresh("r-bob").await.unwrap().unwrap().revoked);
    }
}
