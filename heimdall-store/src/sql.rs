//! SQLite storage adapter.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    Client, ClientStore, ClientType, Login, Store, StoreError, StoreResult, Token, TokenKind,
    TokenStore, User, UserStore, live,
};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    secret TEXT NOT NULL,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    internal INTEGER NOT NULL,
    redirect_uris TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS logins (
    username TEXT PRIMARY KEY,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    salt TEXT NOT NULL,
    password_hash TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS consents (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    client_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    PRIMARY KEY (user_id, client_id)
);

CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    user_id TEXT,
    client_id TEXT,
    expires INTEGER NOT NULL,
    scope TEXT NOT NULL,
    access_type TEXT,
    refresh_token TEXT
);

CREATE INDEX IF NOT EXISTS idx_tokens_expires ON tokens(expires);
";

/// Relational store on a single SQLite connection.
///
/// Each call takes the connection lock for exactly one statement or
/// transaction and never holds it across an await point.
pub struct SqlStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore").finish_non_exhaustive()
    }
}

// Scopes never contain spaces; redirect URIs never contain newlines.
fn join_scopes(scopes: &[String]) -> String {
    scopes.join(" ")
}

fn split_scopes(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn join_uris(uris: &[String]) -> String {
    uris.join("\n")
}

fn split_uris(value: &str) -> Vec<String> {
    value
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    let client_type: String = row.get(3)?;
    let redirect_uris: String = row.get(5)?;
    Ok(Client {
        id: row.get(0)?,
        secret: row.get(1)?,
        name: row.get(2)?,
        client_type: ClientType::parse(&client_type).unwrap_or_default(),
        internal: row.get(4)?,
        redirect_uris: split_uris(&redirect_uris),
    })
}

type TokenRow = (String, String, Option<String>, Option<String>, i64, String, Option<String>, Option<String>);

fn token_row(row: &Row<'_>) -> rusqlite::Result<TokenRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn token_from_row(row: TokenRow) -> StoreResult<Token> {
    let (id, kind, user_id, client_id, expires, scope, access_type, refresh_token) = row;
    let kind = TokenKind::from_parts(&kind, refresh_token, access_type.as_deref())
        .ok_or_else(|| StoreError::Backend(format!("unknown token type {kind}")))?;
    Ok(Token {
        id,
        kind,
        user_id,
        client_id,
        expires: from_millis(expires),
        scope: split_scopes(&scope),
    })
}

const TOKEN_COLUMNS: &str =
    "id, type, user_id, client_id, expires, scope, access_type, refresh_token";

impl SqlStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("SQL store opened at {}", path.as_ref().display());
        Self::init(conn)
    }

    pub fn in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn put_client(&self, client: &Client) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO clients (id, secret, name, type, internal, redirect_uris)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                client.id,
                client.secret,
                client.name,
                client.client_type.as_str(),
                client.internal,
                join_uris(&client.redirect_uris),
            ],
        )?;
        Ok(())
    }

    fn select_client(&self, id: &str) -> StoreResult<Client> {
        self.conn
            .lock()
            .query_row(
                "SELECT id, secret, name, type, internal, redirect_uris FROM clients WHERE id = ?1",
                params![id],
                client_from_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    fn put_user(&self, user: &User) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        if let Some(login) = &user.login {
            let owner: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM logins WHERE username = ?1",
                    params![login.username],
                    |row| row.get(0),
                )
                .optional()?;
            if owner.is_some_and(|owner| owner != user.id) {
                return Err(StoreError::Backend(format!(
                    "username {} already taken",
                    login.username
                )));
            }
        }
        tx.execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![user.id, user.name],
        )?;
        tx.execute("DELETE FROM logins WHERE user_id = ?1", params![user.id])?;
        if let Some(login) = &user.login {
            tx.execute(
                "INSERT INTO logins (username, user_id, salt, password_hash)
                 VALUES (?1, ?2, ?3, ?4)",
                params![login.username, user.id, login.salt, login.password_hash],
            )?;
        }
        tx.execute("DELETE FROM consents WHERE user_id = ?1", params![user.id])?;
        for (client_id, scopes) in &user.consents {
            tx.execute(
                "INSERT INTO consents (user_id, client_id, scope) VALUES (?1, ?2, ?3)",
                params![user.id, client_id, join_scopes(scopes)],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn select_user(&self, id: &str) -> StoreResult<User> {
        let conn = self.conn.lock();
        let name: String = conn
            .query_row("SELECT name FROM users WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let login = conn
            .query_row(
                "SELECT username, salt, password_hash FROM logins WHERE user_id = ?1",
                params![id],
                |row| {
                    Ok(Login {
                        username: row.get(0)?,
                        salt: row.get(1)?,
                        password_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;

        let mut stmt = conn.prepare("SELECT client_id, scope FROM consents WHERE user_id = ?1")?;
        let consents = stmt
            .query_map(params![id], |row| {
                let scope: String = row.get(1)?;
                Ok((row.get::<_, String>(0)?, split_scopes(&scope)))
            })?
            .collect::<rusqlite::Result<HashMap<_, _>>>()?;

        Ok(User {
            id: id.to_string(),
            name,
            consents,
            login,
        })
    }

    fn user_id_for_login(&self, username: &str) -> StoreResult<Option<String>> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT user_id FROM logins WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn put_token(&self, token: &Token) -> StoreResult<()> {
        let access_type = match token.kind {
            TokenKind::AuthorizationCode { access_type } => Some(access_type.as_str()),
            _ => None,
        };
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO tokens (id, type, user_id, client_id, expires, scope, access_type, refresh_token)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                token.id,
                token.kind.name(),
                token.user_id,
                token.client_id,
                to_millis(token.expires),
                join_scopes(&token.scope),
                access_type,
                token.refresh_token(),
            ],
        )?;
        Ok(())
    }

    fn select_token(&self, id: &str) -> StoreResult<Token> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
                params![id],
                token_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        let token = token_from_row(row)?;
        if token.is_expired() {
            conn.execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        }
        live(token)
    }

    fn touch_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE tokens SET expires = ?2 WHERE id = ?1 AND expires >= ?3",
            params![id, to_millis(expires), to_millis(Utc::now())],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        let row = tx.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
            params![id],
            token_row,
        )?;
        tx.commit()?;
        token_from_row(row)
    }

    fn take_token(&self, id: &str) -> StoreResult<Token> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let row = tx
            .query_row(
                &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
                params![id],
                token_row,
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;
        tx.execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        tx.commit()?;
        live(token_from_row(row)?)
    }

    fn delete_row(&self, table: &str, id: &str) -> StoreResult<()> {
        self.conn
            .lock()
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        Ok(())
    }
}

#[async_trait]
impl ClientStore for SqlStore {
    async fn create_client(&self, client: &Client) -> StoreResult<()> {
        self.put_client(client)
    }

    async fn get_client(&self, id: &str) -> StoreResult<Client> {
        self.select_client(id)
    }

    async fn update_client(&self, client: &Client) -> StoreResult<()> {
        self.put_client(client)
    }

    async fn delete_client(&self, id: &str) -> StoreResult<()> {
        self.delete_row("clients", id)
    }
}

#[async_trait]
impl UserStore for SqlStore {
    async fn create_user(&self, user: &User) -> StoreResult<()> {
        self.put_user(user)
    }

    async fn get_user(&self, id: &str) -> StoreResult<User> {
        self.select_user(id)
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        self.put_user(user)
    }

    async fn delete_user(&self, id: &str) -> StoreResult<()> {
        self.delete_row("users", id)
    }

    async fn verify_user(&self, username: &str, password: &str) -> StoreResult<User> {
        let user_id = self
            .user_id_for_login(username)?
            .ok_or(StoreError::InvalidCredentials)?;
        let user = self.select_user(&user_id)?;
        match &user.login {
            Some(login) if login.verify(password) => Ok(user),
            _ => Err(StoreError::InvalidCredentials),
        }
    }
}

#[async_trait]
impl TokenStore for SqlStore {
    async fn create_token(&self, token: &Token) -> StoreResult<()> {
        self.put_token(token)
    }

    async fn get_token(&self, id: &str) -> StoreResult<Token> {
        self.select_token(id)
    }

    async fn update_token(&self, token: &Token) -> StoreResult<()> {
        self.put_token(token)
    }

    async fn delete_token(&self, id: &str) -> StoreResult<()> {
        self.delete_row("tokens", id)
    }

    async fn extend_token(&self, id: &str, expires: DateTime<Utc>) -> StoreResult<Token> {
        self.touch_token(id, expires)
    }

    async fn consume_token(&self, id: &str) -> StoreResult<Token> {
        self.take_token(id)
    }
}

#[async_trait]
impl Store for SqlStore {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccessType;
    use chrono::Duration;

    #[tokio::test]
    async fn test_consents_round_trip_through_tables() {
        let store = SqlStore::in_memory().unwrap();
        let mut user = store.new_user();
        user.name = "Alice".to_string();
        user.consents
            .insert("c1".to_string(), vec!["read".to_string(), "write".to_string()]);
        store.create_user(&user).await.unwrap();

        let loaded = store.get_user(&user.id).await.unwrap();
        assert_eq!(loaded.consents["c1"], vec!["read", "write"]);

        user.consents.clear();
        store.update_user(&user).await.unwrap();
        assert!(store.get_user(&user.id).await.unwrap().consents.is_empty());
    }

    #[tokio::test]
    async fn test_type_specific_columns() {
        let store = SqlStore::in_memory().unwrap();
        let mut code = store.new_token(TokenKind::AuthorizationCode {
            access_type: AccessType::Offline,
        });
        code.expires = Utc::now() + Duration::minutes(10);
        store.create_token(&code).await.unwrap();

        let loaded = store.get_token(&code.id).await.unwrap();
        assert_eq!(loaded.access_type(), AccessType::Offline);
        assert_eq!(loaded.expires.timestamp_millis(), code.expires.timestamp_millis());
    }

    #[tokio::test]
    async fn test_deleting_user_removes_login() {
        let store = SqlStore::in_memory().unwrap();
        let mut user = store.new_user();
        user.set_password("alice", "pw");
        store.create_user(&user).await.unwrap();
        store.delete_user(&user.id).await.unwrap();

        assert!(matches!(
            store.verify_user("alice", "pw").await,
            Err(StoreError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = SqlStore::in_memory().unwrap();
        assert!(store.health_check().await.is_ok());
    }
}
