use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;

use crate::{
    Client, ClientStore, Store, StoreError, StoreResult, Token, TokenStore, User, UserStore, live,
};

/// Map-backed store. Each map is sharded so operations on distinct ids do not
/// contend, and every mutation of one id happens under that entry's lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: DashMap<String, Client>,
    users: DashMap<String, User>,
    tokens: DashMap<String, Token>,
    /// username -> user id
    logins: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    fn index_login(&self, user: &User) -> StoreResult<()> {
        if let Some(login) = &user.login {
            if let Some(owner) = self.logins.get(&login.username) {
                if owner.value() != &user.id {
                    return Err(StoreError::Backend(format!(
                        "username {} already taken",
                        login.username
                    )));
                }
            }
        }
        // Drop a stale username if the login changed
        self.logins.retain(|_, owner| owner != &user.id);
        if let Some(login) = &user.login {
            self.logins.insert(login.username.clone(), user.id.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn create_client(&self, client: &Client) -> StoreResult<()> {
        self.clients.insert(client.id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        self.clients
            .get(id)
            .map(|c| c.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_client(&self, client: &Client) -> StoreResult<()> {
        self.create_client(client).await
    }

    async fn delete_client(&self, id: &str) -> StoreResult<()> {
        self.clients.remove(id);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.index_login(user)?;
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.create_user(user).await
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        if self.users.remove(id).is_some() {
            self.logins.retain(|_, owner| owner != id);
        }
        Ok(())
    }

    async fn verify_user(&self, username: &str, password: &str) -> StoreResult<User> {
        let user_id = self
            .logins
            .get(username)
            .map(|id| id.value().clone())
            .ok_or(StoreError::InvalidCredentials)?;
        let user = self
            .get_user(&user_id)
            .await
            .map_err(|_| StoreError::InvalidCredentials)?;
        match &user.login {
            Some(login) if login.username == username && login.verify(password) => Ok(user),
            _ => Err(StoreError::InvalidCredentials),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn create_token(&self, token: &Token) -> StoreResult<()> {
        self.tokens.insert(token.id.clone(), token.clone());
        Ok(())
    }

    async fn get_token(&self, id: &str) -> StoreResult<Token> {
        let token = self
            .tokens
            .get(id)
            .map(|t| t.value().clone())
            .ok_or(StoreError::NotFound)?;
        live(token).inspect_err(|_| {
            debug!("Dropping expired token on read");
            self.tokens.remove_if(id, |_, t| t.is_expired());
        })
    }

    async fn update_token(&self, token: &Token) -> StoreResult<()> {
        self.create_token(token).await
    }

    async fn delete_token(&self, id: &str) -> StoreResult<()> {
        self.tokens.remove(id);
        Ok(())
    }

    async fn extend_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token> {
        let extended = match self.tokens.get_mut(id) {
            Some(mut entry) if !entry.is_expired() => {
                entry.expires = expires;
                Some(entry.value().clone())
            }
            Some(_) => None,
            None => return Err(StoreError::NotFound),
        };
        // The shard guard is released before touching the map again
        extended.ok_or_else(|| {
            self.tokens.remove_if(id, |_, t| t.is_expired());
            StoreError::NotFound
        })
    }

    async fn consume_token(&self, id: &str) -> StoreResult<Token> {
        let (_, token) = self.tokens.remove(id).ok_or(StoreError::NotFound)?;
        live(token)
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }
}
