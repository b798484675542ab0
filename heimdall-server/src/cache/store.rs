//! Write-through token cache in front of a record store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heimdall_store::{
    Client, ClientStore, Store, StoreError, StoreResult, Token, TokenStore, User, UserStore,
};
use log::{debug, warn};

use super::{Cache, CacheBackend};

const TOKEN_KEY_PREFIX: &str = "heimdall_token:";

fn token_key(id: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{id}")
}

/// Decorates a [`Store`] with a token cache.
///
/// Clients and users always go to the backend. Token writes go to the
/// backend first and then to the cache; deletes remove both. A cache entry
/// lives for the configured ttl or until the token expires, whichever comes
/// first, and reads still apply the expiry check. Cache failures are logged
/// and fall back to the backend.
pub struct CachedStore {
    inner: Arc<dyn Store>,
    cache: Cache,
    max_ttl: Duration,
}

impl CachedStore {
    pub fn new(inner: Arc<dyn Store>, cache: Cache, max_ttl: Duration) -> Self {
        Self {
            inner,
            cache,
            max_ttl,
        }
    }

    /// Time the token may stay cached, `None` once it has expired
    fn ttl_for(&self, token: &Token) -> Option<Duration> {
        let remaining = (token.expires - Utc::now()).to_std().ok()?;
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.min(self.max_ttl))
    }

    async fn remember(&self, token: &Token) {
        let key = token_key(&token.id);
        let result = match self.ttl_for(token) {
            Some(ttl) => self.cache.set(&key, token, ttl).await,
            None => self.cache.delete(&key).await,
        };
        if let Err(e) = result {
            warn!("Token cache write failed: {}", e);
        }
    }

    async fn forget(&self, id: &str) {
        if let Err(e) = self.cache.delete(&token_key(id)).await {
            warn!("Token cache delete failed: {}", e);
        }
    }
}

#[async_trait]
impl ClientStore for CachedStore {
    async fn create_client(&self, client: &Client) -> StoreResult<()> {
        self.inner.create_client(client).await
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        self.inner.get_client(id).await
    }

    async fn update_client(&self, client: &Client) -> StoreResult<()> {
        self.inner.update_client(client).await
    }

    async fn delete_client(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_client(id).await
    }

    async fn verify_client(&self, id: &str, secret: &str) -> StoreResult<Client> {
        self.inner.verify_client(id, secret).await
    }
}

#[async_trait]
impl UserStore for CachedStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.inner.create_user(user).await
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.inner.get_user(id).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.inner.update_user(user).await
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_user(id).await
    }

    async fn verify_user(&self, username: &str, password: &str) -> StoreResult<User> {
        self.inner.verify_user(username, password).await
    }
}

#[async_trait]
impl TokenStore for CachedStore {
    async fn create_token(&self, token: &Token) -> StoreResult<()> {
        self.inner.create_token(token).await?;
        self.remember(token).await;
        Ok(())
    }

    async fn get_token(&self, id: &str) -> StoreResult<Token> {
        match self.cache.get::<Token>(&token_key(id)).await {
            Ok(Some(token)) if !token.is_expired() => {
                debug!("Token cache hit");
                return Ok(token);
            }
            Ok(Some(_)) => {
                self.forget(id).await;
                return Err(StoreError::NotFound);
            }
            Ok(None) => {}
            Err(e) => warn!("Token cache read failed, using store: {}", e),
        }

        let token = self.inner.get_token(id).await?;
        self.remember(&token).await;
        Ok(token)
    }

    async fn update_token(&self, token: &Token) -> StoreResult<()> {
        self.inner.update_token(token).await?;
        self.remember(token).await;
        Ok(())
    }

    async fn delete_token(&self, id: &str) -> StoreResult<()> {
        self.inner.delete_token(id).await?;
        self.forget(id).await;
        Ok(())
    }

    async fn extend_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token> {
        let result = self.inner.extend_token(id, expires).await;
        // Evict only; a cache write here could revive a concurrent revoke
        self.forget(id).await;
        result
    }

    async fn consume_token(&self, id: &str) -> StoreResult<Token> {
        let result = self.inner.consume_token(id).await;
        self.forget(id).await;
        result
    }
}

#[async_trait]
impl Store for CachedStore {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.inner.health_check().await?;
        self.cache
            .health_check()
            .await
            .map_err(StoreError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use chrono::Duration as ChronoDuration;
    use heimdall_store::{MemoryStore, TokenKind};

    fn cached() -> (Arc<MemoryStore>, CachedStore) {
        let backend = Arc::new(MemoryStore::new());
        let cache = Cache::InMemory(InMemoryCache::new(16).unwrap());
        let store = CachedStore::new(backend.clone(), cache, Duration::from_secs(60));
        (backend, store)
    }

    fn session(ttl: ChronoDuration) -> Token {
        let mut token = Token::new(heimdall_store::new_id(), TokenKind::Session);
        token.expires = Utc::now() + ttl;
        token
    }

    #[tokio::test]
    async fn test_reads_are_served_from_cache() {
        let (backend, store) = cached();
        let token = session(ChronoDuration::hours(1));
        store.create_token(&token).await.unwrap();

        // Remove behind the cache's back; the cached copy still answers
        backend.delete_token(&token.id).await.unwrap();
        assert_eq!(store.get_token(&token.id).await.unwrap().id, token.id);
    }

    #[tokio::test]
    async fn test_delete_and_consume_evict() {
        let (_backend, store) = cached();
        let a = session(ChronoDuration::hours(1));
        let b = session(ChronoDuration::hours(1));
        store.create_token(&a).await.unwrap();
        store.create_token(&b).await.unwrap();

        store.delete_token(&a.id).await.unwrap();
        assert!(store.get_token(&a.id).await.unwrap_err().is_not_found());

        store.consume_token(&b.id).await.unwrap();
        assert!(store.get_token(&b.id).await.unwrap_err().is_not_found());
        assert!(store.consume_token(&b.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_expired_cached_token_reads_as_not_found() {
        let (_backend, store) = cached();
        let mut token = session(ChronoDuration::hours(1));
        store.create_token(&token).await.unwrap();

        token.expires = Utc::now() - ChronoDuration::seconds(1);
        store.update_token(&token).await.unwrap();
        assert!(store.get_token(&token.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_extend_after_delete_stays_deleted() {
        let (backend, store) = cached();
        let token = session(ChronoDuration::hours(1));
        store.create_token(&token).await.unwrap();

        let later = Utc::now() + ChronoDuration::hours(2);
        let extended = store.extend_token(&token.id, later).await.unwrap();
        assert_eq!(extended.expires, later);
        assert_eq!(store.get_token(&token.id).await.unwrap().expires, later);

        store.delete_token(&token.id).await.unwrap();
        assert!(store
            .extend_token(&token.id, later)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store.get_token(&token.id).await.unwrap_err().is_not_found());
        assert!(backend.get_token(&token.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_ttl_never_exceeds_token_lifetime() {
        let (_backend, store) = cached();
        let short = session(ChronoDuration::seconds(5));
        let long = session(ChronoDuration::hours(5));

        assert!(store.ttl_for(&short).unwrap() <= Duration::from_secs(5));
        assert_eq!(store.ttl_for(&long).unwrap(), Duration::from_secs(60));
        assert!(store
            .ttl_for(&session(-ChronoDuration::seconds(1)))
            .is_none());
    }

    #[tokio::test]
    async fn test_clients_and_users_pass_through() {
        let (backend, store) = cached();
        let mut user = store.new_user();
        user.set_password("alice", "pw");
        store.create_user(&user).await.unwrap();

        assert_eq!(backend.get_user(&user.id).await.unwrap(), user);
        assert_eq!(store.verify_user("alice", "pw").await.unwrap().id, user.id);
        assert_eq!(store.name(), "memory");
    }
}
