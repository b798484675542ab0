use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::Mutex;

use crate::{
    Client, ClientStore, Store, StoreError, StoreResult, Token, TokenStore, User, UserStore, live,
    new_id,
};

const CLIENTS: &str = "clients";
const USERS: &str = "users";
const TOKENS: &str = "tokens";
const LOGINS_FILE: &str = "logins.json";

/// Flat-file store: one JSON document per record.
///
/// Layout under the root directory:
/// ```text
/// clients/<id>.json
/// users/<id>.json
/// tokens/<id>.json
/// logins.json        username -> user id
/// ```
/// Records are written to a temporary file and renamed into place, so a
/// reader sees either the previous or the new document. Writers to the same
/// id queue on a per-id lock.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    logins: Mutex<()>,
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [CLIENTS, USERS, TOKENS] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        info!("File store opened at {}", root.display());
        Ok(Self {
            root,
            locks: DashMap::new(),
            logins: Mutex::new(()),
        })
    }

    fn record_path(&self, family: &str, id: &str) -> StoreResult<PathBuf> {
        // Ids become file names; refuse anything that could escape the directory
        if id.is_empty()
            || id.starts_with('.')
            || id.contains(['/', '\\'])
            || id.chars().any(char::is_control)
        {
            return Err(StoreError::NotFound);
        }
        Ok(self.root.join(family).join(format!("{id}.json")))
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget the lock for `path` once nobody else holds or waits on it
    fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks
            .remove_if(path, |_, held| Arc::strong_count(held) == 1);
    }

    async fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension(format!("{}.tmp", new_id()));
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
        match fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(path: &Path) -> StoreResult<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn put<T: Serialize>(&self, family: &str, id: &str, value: &T) -> StoreResult<()> {
        let path = self.record_path(family, id)?;
        let lock = self.lock_for(&path);
        let guard = lock.lock().await;
        let result = self.write_atomic(&path, value).await;
        drop(guard);
        self.release(&path, lock);
        result
    }

    async fn get<T: DeserializeOwned>(&self, family: &str, id: &str) -> StoreResult<T> {
        let path = self.record_path(family, id)?;
        Self::read(&path).await
    }

    async fn delete(&self, family: &str, id: &str) -> StoreResult<()> {
        let path = self.record_path(family, id)?;
        let lock = self.lock_for(&path);
        let guard = lock.lock().await;
        let result = Self::remove(&path).await;
        drop(guard);
        self.release(&path, lock);
        result
    }

    async fn read_logins(&self) -> StoreResult<HashMap<String, String>> {
        match Self::read(&self.root.join(LOGINS_FILE)).await {
            Err(StoreError::NotFound) => Ok(HashMap::new()),
            other => other,
        }
    }

    async fn index_login(&self, user: &User) -> StoreResult<()> {
        let _guard = self.logins.lock().await;
        let mut logins = self.read_logins().await?;
        if let Some(login) = &user.login {
            if logins
                .get(&login.username)
                .is_some_and(|owner| owner != &user.id)
            {
                return Err(StoreError::Backend(format!(
                    "username {} already taken",
                    login.username
                )));
            }
        }
        let before = logins.len();
        logins.retain(|_, owner| owner != &user.id);
        let changed = match &user.login {
            Some(login) => {
                logins.insert(login.username.clone(), user.id.clone());
                true
            }
            None => logins.len() != before,
        };
        if changed {
            self.write_atomic(&self.root.join(LOGINS_FILE), &logins)
                .await?;
        }
        Ok(())
    }

    async fn unindex_user(&self, id: &str) -> StoreResult<()> {
        let _guard = self.logins.lock().await;
        let mut logins = self.read_logins().await?;
        let before = logins.len();
        logins.retain(|_, owner| owner != id);
        if logins.len() != before {
            self.write_atomic(&self.root.join(LOGINS_FILE), &logins)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ClientStore for FileStore {
    async fn create_client(&self, client: &Client) -> StoreResult<()> {
        self.put(CLIENTS, &client.id, client).await
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        self.get(CLIENTS, id).await
    }

    async fn update_client(&self, client: &Client) -> StoreResult<()> {
        self.put(CLIENTS, &client.id, client).await
    }

    async fn delete_client(&self, id: &str) -> StoreResult<()> {
        self.delete(CLIENTS, id).await
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.index_login(user).await?;
        self.put(USERS, &user.id, user).await
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.get(USERS, id).await
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.create_user(user).await
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        self.delete(USERS, id).await?;
        self.unindex_user(id).await
    }

    async fn verify_user(&self, username: &str, password: &str) -> StoreResult<User> {
        let logins = self.read_logins().await?;
        let user_id = logins
            .get(username)
            .ok_or(StoreError::InvalidCredentials)?;
        let user = match self.get_user(user_id).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(StoreError::InvalidCredentials),
            Err(e) => return Err(e),
        };
        match &user.login {
            Some(login) if login.username == username && login.verify(password) => Ok(user),
            _ => Err(StoreError::InvalidCredentials),
        }
    }
}

#[async_trait]
impl TokenStore for FileStore {
    async fn create_token(&self, token: &Token) -> StoreResult<()> {
        self.put(TOKENS, &token.id, token).await
    }

    async fn get_token(&self, id: &str) -> StoreResult<Token> {
        let token: Token = self.get(TOKENS, id).await?;
        if token.is_expired() {
            debug!("Removing expired token file");
            self.delete(TOKENS, id).await?;
        }
        live(token)
    }

    async fn update_token(&self, token: &Token) -> StoreResult<()> {
        self.put(TOKENS, &token.id, token).await
    }

    async fn delete_token(&self, id: &str) -> StoreResult<()> {
        self.delete(TOKENS, id).await
    }

    async fn extend_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token> {
        let path = self.record_path(TOKENS, id)?;
        let lock = self.lock_for(&path);
        let guard = lock.lock().await;
        let result = match Self::read::<Token>(&path).await {
            Ok(token) if token.is_expired() => Self::remove(&path)
                .await
                .and(Err(StoreError::NotFound)),
            Ok(mut token) => {
                token.expires = expires;
                self.write_atomic(&path, &token).await.map(|()| token)
            }
            Err(e) => Err(e),
        };
        drop(guard);
        self.release(&path, lock);
        result
    }

    async fn consume_token(&self, id: &str) -> StoreResult<Token> {
        let path = self.record_path(TOKENS, id)?;
        let lock = self.lock_for(&path);
        let guard = lock.lock().await;
        let result = match Self::read::<Token>(&path).await {
            Ok(token) => Self::remove(&path).await.map(|()| token),
            Err(e) => Err(e),
        };
        drop(guard);
        self.release(&path, lock);
        live(result?)
    }
}

#[async_trait]
impl Store for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn health_check(&self) -> StoreResult<()> {
        let meta = fs::metadata(&self.root).await?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Backend(format!(
                "{} is not a directory",
                self.root.display()
            )))
        }
    }
}
