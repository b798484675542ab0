//! Request identity resolution.
//!
//! Three credential carriers are recognised, in strict precedence:
//! HTTP Basic (user login first, then client credentials), a Bearer access
//! token, then the session cookie. The first carrier present decides the
//! outcome; lookup failures leave the identity empty instead of failing the
//! request.

use std::convert::Infallible;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{Duration, Utc};
use cookie::Cookie;
use heimdall_store::{
    Client, ClientStore, Store, StoreError, StoreResult, Token, TokenKind, TokenStore, User,
    UserStore,
};
use log::{debug, warn};
use serde::Serialize;
use utoipa::ToSchema;

use super::{INTERNAL_CLIENT_ID, SESSION_COOKIE};
use crate::state::AppState;

/// Who is calling: each part may be absent
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub token: Option<Token>,
    pub client: Option<Client>,
    pub user: Option<User>,
}

impl Identity {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// The `(user id, client id)` pair handed to downstream handlers.
    /// Client-only tokens report the client as the user.
    pub fn context(&self) -> RequestIdentity {
        let Some(token) = &self.token else {
            return RequestIdentity::default();
        };
        RequestIdentity {
            user_id: token.user_id.clone().or_else(|| token.client_id.clone()),
            client_id: token.client_id.clone(),
        }
    }
}

/// Request-scoped projection of the resolved identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RequestIdentity {
    pub user_id: Option<String>,
    pub client_id: Option<String>,
}

/// Credential carrier found on a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer(String),
    Session(String),
    Anonymous,
}

impl Credentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        if let Some((username, password)) = basic_credentials(headers) {
            Credentials::Basic { username, password }
        } else if let Some(token) = bearer_token(headers) {
            Credentials::Bearer(token)
        } else if let Some(session) = session_cookie(headers) {
            Credentials::Session(session)
        } else {
            Credentials::Anonymous
        }
    }
}

fn authorization<'h>(headers: &'h HeaderMap, scheme: &str) -> Option<&'h str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (given, rest) = value.split_once(' ')?;
    given.eq_ignore_ascii_case(scheme).then(|| rest.trim())
}

/// Decode `Authorization: Basic base64(id:secret)`
pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = authorization(headers, "Basic")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    authorization(headers, "Bearer")
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(Cookie::split_parse)
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == SESSION_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}

/// Lookup misses are expected; anything else is logged before degrading to absent
fn found<T>(what: &str, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(StoreError::NotFound | StoreError::InvalidCredentials) => None,
        Err(e) => {
            warn!("Identity lookup of {} failed: {}", what, e);
            None
        }
    }
}

pub struct IdentityResolver<'a> {
    store: &'a dyn Store,
    session_ttl: Duration,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(store: &'a dyn Store, session_ttl: Duration) -> Self {
        Self { store, session_ttl }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(state.store.as_ref(), state.config.oauth.session_ttl())
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Identity {
        match Credentials::from_headers(headers) {
            Credentials::Basic { username, password } => self.basic(&username, &password).await,
            Credentials::Bearer(id) => self.bearer(&id).await,
            Credentials::Session(id) => self.session(&id).await,
            Credentials::Anonymous => Identity::default(),
        }
    }

    /// A one-use Basic token is synthesized for the request and never stored
    async fn basic(&self, username: &str, password: &str) -> Identity {
        if let Some(user) = found("user", self.store.verify_user(username, password).await) {
            let client = found("client", self.store.get_client(INTERNAL_CLIENT_ID).await);
            let mut token = self.store.new_token(TokenKind::Basic);
            token.user_id = Some(user.id.clone());
            token.client_id = Some(INTERNAL_CLIENT_ID.to_string());
            debug!("Basic login for user {}", user.id);
            return Identity {
                token: Some(token),
                client,
                user: Some(user),
            };
        }

        if let Some(client) = found("client", self.store.verify_client(username, password).await) {
            let mut token = self.store.new_token(TokenKind::Basic);
            token.client_id = Some(client.id.clone());
            debug!("Basic login for client {}", client.id);
            return Identity {
                token: Some(token),
                client: Some(client),
                user: None,
            };
        }

        debug!("Basic credentials rejected");
        Identity::default()
    }

    async fn bearer(&self, id: &str) -> Identity {
        match found("token", self.store.get_token(id).await) {
            Some(token) if matches!(token.kind, TokenKind::Bearer { .. }) => {
                self.with_owners(token).await
            }
            _ => Identity::default(),
        }
    }

    /// Every authenticated use pushes the session's expiry forward. A session
    /// revoked between the read and the renewal stays revoked.
    async fn session(&self, id: &str) -> Identity {
        let token = match found("session", self.store.get_token(id).await) {
            Some(token) if token.kind == TokenKind::Session => token,
            _ => return Identity::default(),
        };

        let token = match self
            .store
            .extend_token(id, Utc::now() + self.session_ttl)
            .await
        {
            Ok(extended) => extended,
            Err(StoreError::NotFound) => {
                debug!("Session disappeared before renewal");
                return Identity::default();
            }
            Err(e) => {
                warn!("Could not extend session: {}", e);
                token
            }
        };
        self.with_owners(token).await
    }

    async fn with_owners(&self, token: Token) -> Identity {
        let client = match token.client_id.as_deref() {
            Some(id) => found("client", self.store.get_client(id).await),
            None => None,
        };
        let user = match token.user_id.as_deref() {
            Some(id) => found("user", self.store.get_user(id).await),
            None => None,
        };
        Identity {
            token: Some(token),
            client,
            user,
        }
    }
}

/// Resolves at most once per request; later extractions reuse the stored result
impl<S> FromRequestParts<S> for Identity
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        let state = AppState::from_ref(state);
        let identity = IdentityResolver::from_state(&state)
            .resolve(&parts.headers)
            .await;
        parts.extensions.insert(identity.context());
        parts.extensions.insert(identity.clone());
        Ok(identity)
    }
}
