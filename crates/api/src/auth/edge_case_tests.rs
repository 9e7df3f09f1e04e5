//! Session lifecycle edge cases driven through the manager
//!
//! These run against the in-memory store so every scenario controls its own
//! records; Postgres-specific behavior is covered by the store itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, CredentialError, RefreshError, StoreError};

use super::activity::NoopActivityLog;
use super::credentials::{CredentialVerifier, VerifiedIdentity};
use super::jwt::TokenCodec;
use super::manager::SessionManager;
use super::sessions::{
    AccessTokenRecord, InMemorySessionStore, RefreshTokenRecord, SessionStore,
};

const TEST_SECRET: &str = "test-secret-key-at-least-32-chars!";

/// Accepts exactly one identifier/secret pair
struct FixtureVerifier {
    account_id: Uuid,
    identifier: String,
    secret: String,
    authorities: Vec<String>,
}

impl FixtureVerifier {
    fn new(account_id: Uuid) -> Self {
        Self {
            account_id,
            identifier: "alice@example.com".to_string(),
            secret: "correct horse battery staple".to_string(),
            authorities: vec!["USER".to_string()],
        }
    }
}

#[async_trait]
impl CredentialVerifier for FixtureVerifier {
    async fn verify(&self, identifier: &str, secret: &str) -> Result<VerifiedIdentity, ApiError> {
        if identifier == self.identifier && secret == self.secret {
            Ok(VerifiedIdentity {
                account_id: self.account_id,
                authorities: self.authorities.clone(),
            })
        } else {
            Err(CredentialError::InvalidCredentials.into())
        }
    }

    async fn authorities_for(&self, account_id: Uuid) -> Result<Vec<String>, ApiError> {
        if account_id == self.account_id {
            Ok(self.authorities.clone())
        } else {
            Err(CredentialError::InvalidCredentials.into())
        }
    }
}

/// Fails the first `replace_access` with a conflict, then delegates
struct ConflictOnceStore {
    inner: InMemorySessionStore,
    tripped: AtomicBool,
}

impl ConflictOnceStore {
    fn new() -> Self {
        Self {
            inner: InMemorySessionStore::new(),
            tripped: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SessionStore for ConflictOnceStore {
    async fn replace_access(&self, record: &AccessTokenRecord) -> Result<(), StoreError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Conflict);
        }
        self.inner.replace_access(record).await
    }

    async fn find_access(
        &self,
        token_value: &str,
    ) -> Result<Option<AccessTokenRecord>, StoreError> {
        self.inner.find_access(token_value).await
    }

    async fn delete_access(&self, token_value: &str) -> Result<bool, StoreError> {
        self.inner.delete_access(token_value).await
    }

    async fn delete_access_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_access_for_owner(owner).await
    }

    async fn insert_refresh(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        self.inner.insert_refresh(record).await
    }

    async fn find_refresh(
        &self,
        token_value: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        self.inner.find_refresh(token_value).await
    }

    async fn revoke_refresh(&self, token_value: &str) -> Result<bool, StoreError> {
        self.inner.revoke_refresh(token_value).await
    }

    async fn revoke_refresh_for_owner(&self, owner: Uuid) -> Result<u64, StoreError> {
        self.inner.revoke_refresh_for_owner(owner).await
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        self.inner.purge_expired(now).await
    }
}

fn manager_over(store: Arc<InMemorySessionStore>, account_id: Uuid) -> SessionManager {
    SessionManager::new(
        store,
        TokenCodec::new(TEST_SECRET),
        Arc::new(FixtureVerifier::new(account_id)),
        Arc::new(NoopActivityLog),
        Duration::hours(2),
        Duration::days(7),
    )
}

async fn login(manager: &SessionManager) -> ApiResult<super::manager::TokenPair> {
    manager
        .login("alice@example.com", "correct horse battery staple", "WEB", None)
        .await
}

#[tokio::test]
async fn login_creates_one_access_and_one_refresh_record() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let pair = login(&manager).await.unwrap();

    assert_eq!(store.access_len().await, 1);
    assert_eq!(store.refresh_len().await, 1);

    let record = store.find_access(&pair.access_token).await.unwrap().unwrap();
    assert_eq!(record.owner_account_id, account_id);
    assert_eq!(record.device_class, "WEB");
    assert!(store
        .find_refresh(&pair.refresh_token)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn login_with_wrong_secret_stores_nothing() {
    let store = Arc::new(InMemorySessionStore::new());
    let manager = manager_over(store.clone(), Uuid::new_v4());

    let err = manager
        .login("alice@example.com", "wrong", "WEB", None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApiError::Credential(CredentialError::InvalidCredentials)
    ));
    assert_eq!(store.access_len().await, 0);
    assert_eq!(store.refresh_len().await, 0);
}

#[tokio::test]
async fn second_login_supersedes_the_first_for_the_same_device() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let first = login(&manager).await.unwrap();
    let second = login(&manager).await.unwrap();

    assert_eq!(store.access_count_for_device(account_id, "WEB").await, 1);
    assert!(store.find_access(&first.access_token).await.unwrap().is_none());
    assert!(store.find_access(&second.access_token).await.unwrap().is_some());
}

#[tokio::test]
async fn concurrent_logins_settle_to_one_access_record() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = Arc::new(manager_over(store.clone(), account_id));

    let (a, b, c) = tokio::join!(login(&manager), login(&manager), login(&manager));
    a.unwrap();
    b.unwrap();
    c.unwrap();

    assert_eq!(store.access_count_for_device(account_id, "WEB").await, 1);
}

#[tokio::test]
async fn logins_on_different_devices_coexist() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    manager
        .login("alice@example.com", "correct horse battery staple", "WEB", None)
        .await
        .unwrap();
    manager
        .login("alice@example.com", "correct horse battery staple", "MOBILE", None)
        .await
        .unwrap();

    assert_eq!(store.access_count_for_device(account_id, "WEB").await, 1);
    assert_eq!(store.access_count_for_device(account_id, "MOBILE").await, 1);
}

#[tokio::test]
async fn logout_is_idempotent() {
    let store = Arc::new(InMemorySessionStore::new());
    let manager = manager_over(store.clone(), Uuid::new_v4());

    let pair = login(&manager).await.unwrap();

    manager.logout(&pair.access_token, None).await.unwrap();
    assert_eq!(store.access_len().await, 0);

    // Second logout with the same dead token: still Ok
    manager.logout(&pair.access_token, None).await.unwrap();
    // And with a token that was never issued
    manager.logout("never-issued", None).await.unwrap();
}

#[tokio::test]
async fn refresh_rotates_both_tokens() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let first = login(&manager).await.unwrap();
    let second = manager.refresh(&first.refresh_token, None).await.unwrap();

    assert_ne!(first.access_token, second.access_token);
    assert_ne!(first.refresh_token, second.refresh_token);

    // The old access record is gone, the new one is live
    assert!(store.find_access(&first.access_token).await.unwrap().is_none());
    assert!(store.find_access(&second.access_token).await.unwrap().is_some());

    // The consumed refresh token is kept around, revoked, for reuse detection
    let old = store
        .find_refresh(&first.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert!(old.revoked);
    let new = store
        .find_refresh(&second.refresh_token)
        .await
        .unwrap()
        .unwrap();
    assert!(!new.revoked);
}

#[tokio::test]
async fn refresh_reuse_tears_down_every_session_for_the_owner() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let first = login(&manager).await.unwrap();
    manager.refresh(&first.refresh_token, None).await.unwrap();

    // Replaying the consumed token must fail loudly and revoke everything
    let err = manager
        .refresh(&first.refresh_token, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::Refresh(RefreshError::RefreshTokenReused)
    ));

    assert_eq!(store.access_len().await, 0);
    assert!(store
        .find_refresh(&first.refresh_token)
        .await
        .unwrap()
        .unwrap()
        .revoked);
}

#[tokio::test]
async fn refresh_with_expired_token_is_rejected() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let now = OffsetDateTime::now_utc();
    store
        .insert_refresh(&RefreshTokenRecord {
            token_value: "stale-refresh".to_string(),
            owner_account_id: account_id,
            issued_at: now - Duration::days(8),
            expires_at: now - Duration::days(1),
            revoked: false,
        })
        .await
        .unwrap();

    let err = manager.refresh("stale-refresh", None).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Refresh(RefreshError::RefreshTokenExpired)
    ));
}

#[tokio::test]
async fn refresh_with_unknown_token_is_rejected() {
    let store = Arc::new(InMemorySessionStore::new());
    let manager = manager_over(store, Uuid::new_v4());

    let err = manager.refresh("never-issued", None).await.unwrap_err();
    assert!(matches!(
        err,
        ApiError::Refresh(RefreshError::RefreshTokenMissing)
    ));
}

#[tokio::test]
async fn token_value_collision_retries_once_and_succeeds() {
    let store = Arc::new(ConflictOnceStore::new());
    let account_id = Uuid::new_v4();
    let manager = SessionManager::new(
        store.clone(),
        TokenCodec::new(TEST_SECRET),
        Arc::new(FixtureVerifier::new(account_id)),
        Arc::new(NoopActivityLog),
        Duration::hours(2),
        Duration::days(7),
    );

    let pair = login(&manager).await.unwrap();

    // The first attempt conflicted; the retry landed a record
    assert!(store.find_access(&pair.access_token).await.unwrap().is_some());
}

#[tokio::test]
async fn sweep_purges_stale_records_and_reports_the_count() {
    let store = Arc::new(InMemorySessionStore::new());
    let account_id = Uuid::new_v4();
    let manager = manager_over(store.clone(), account_id);

    let pair = login(&manager).await.unwrap();
    let now = OffsetDateTime::now_utc();
    store
        .insert_refresh(&RefreshTokenRecord {
            token_value: "long-gone".to_string(),
            owner_account_id: account_id,
            issued_at: now - Duration::days(20),
            expires_at: now - Duration::days(13),
            revoked: false,
        })
        .await
        .unwrap();

    let purged = manager.sweep().await.unwrap();

    assert_eq!(purged, 1);
    assert!(store.find_refresh("long-gone").await.unwrap().is_none());
    assert!(store.find_access(&pair.access_token).await.unwrap().is_some());
}
