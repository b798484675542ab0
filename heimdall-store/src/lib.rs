//! Record model and storage contract for the Heimdall authorization server.
//!
//! Three interchangeable backends implement the same [`Store`] contract:
//! [`MemoryStore`], [`FileStore`] and [`SqlStore`]. Every backend treats a
//! token read past its `expires` instant as [`StoreError::NotFound`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod error;
pub mod file;
pub mod memory;
pub mod model;
pub mod sql;

pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use model::{
    AccessType, Client, ClientType, Login, Token, TokenKind, User, new_id, new_secret,
};
pub use sql::SqlStore;

#[async_trait]
pub trait ClientStore: Send + Sync {
    /// A fresh client with a new unique id and secret, not yet persisted
    fn new_client(&self) -> Client {
        Client::new(new_id())
    }

    async fn create_client(&self, client: &Client) -> StoreResult<()>;
    async fn get_client(&self, id: &str) -> StoreResult<Client>;
    async fn update_client(&self, client: &Client) -> StoreResult<()>;
    async fn delete_client(&self, id: &str) -> StoreResult<()>;

    async fn verify_client(&self, id: &str, secret: &str) -> StoreResult<Client> {
        match self.get_client(id).await {
            Ok(client) if client.secret == secret => Ok(client),
            Ok(_) | Err(StoreError::NotFound) => Err(StoreError::InvalidCredentials),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    fn new_user(&self) -> User {
        User::new(new_id())
    }

    async fn create_user(&self, user: &User) -> StoreResult<()>;
    async fn get_user(&self, id: &str) -> StoreResult<User>;
    async fn update_user(&self, user: &User) -> StoreResult<()>;
    async fn delete_user(&self, id: &str) -> StoreResult<()>;

    /// Look up the user owning `username` and check the password digest
    async fn verify_user(&self, username: &str, password: &str) -> StoreResult<User>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    fn new_token(&self, kind: TokenKind) -> Token {
        Token::new(new_id(), kind)
    }

    async fn create_token(&self, token: &Token) -> StoreResult<()>;
    async fn get_token(&self, id: &str) -> StoreResult<Token>;
    async fn update_token(&self, token: &Token) -> StoreResult<()>;
    async fn delete_token(&self, id: &str) -> StoreResult<()>;

    /// Move the expiry of an existing live token. Never recreates a token that
    /// was deleted, consumed or has expired: those yield [`StoreError::NotFound`].
    async fn extend_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token>;

    /// Atomically read and delete a token. Of several concurrent consumers of
    /// the same id exactly one receives the record.
    async fn consume_token(&self, id: &str) -> StoreResult<Token>;
}

#[async_trait]
pub trait Store: ClientStore + UserStore + TokenStore {
    fn name(&self) -> &'static str;

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Lazy expiry applied by every backend after a token is read
pub(crate) fn live(token: Token) -> StoreResult<Token> {
    if token.is_expired_at(Utc::now()) {
        Err(StoreError::NotFound)
    } else {
        Ok(token)
    }
}
