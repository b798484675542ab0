//! Minting, introspection and revocation of token records

use chrono::{Duration, Utc};
use heimdall_store::{AccessType, Store, StoreResult, Token, TokenKind, TokenStore};
use log::debug;

use super::models::{TokenInfo, TokenResponse};
use crate::config::OAuthConfig;

/// Whole seconds until `token` expires, rounded to nearest, never negative.
/// Always computed at response time.
pub fn expires_in(token: &Token) -> i64 {
    let remaining_ms = (token.expires - Utc::now()).num_milliseconds();
    ((remaining_ms + 500) / 1000).max(0)
}

/// An access token plus the refresh token minted alongside it, if any
#[derive(Debug, Clone)]
pub struct Issued {
    pub access: Token,
    pub refresh: Option<Token>,
}

impl Issued {
    pub fn response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access.id.clone(),
            token_type: self.access.kind.name().to_string(),
            expires_in: expires_in(&self.access),
            scope: self.access.scope.join(" "),
            refresh_token: self.refresh.as_ref().map(|token| token.id.clone()),
        }
    }
}

/// Who a new access token is for
#[derive(Debug, Clone, Copy)]
pub struct Grantee<'a> {
    pub client_id: &'a str,
    pub user_id: Option<&'a str>,
}

pub struct TokenLifecycle<'a> {
    store: &'a dyn Store,
    config: &'a OAuthConfig,
}

impl<'a> TokenLifecycle<'a> {
    pub fn new(store: &'a dyn Store, config: &'a OAuthConfig) -> Self {
        Self { store, config }
    }

    /// Create and persist a token of `kind` that lives for `ttl`
    pub async fn mint(
        &self,
        kind: TokenKind,
        grantee: Grantee<'_>,
        scope: Vec<String>,
        ttl: Duration,
    ) -> StoreResult<Token> {
        let mut token = self.store.new_token(kind);
        token.client_id = Some(grantee.client_id.to_string());
        token.user_id = grantee.user_id.map(str::to_string);
        token.scope = scope;
        token.expires = Utc::now() + ttl;
        self.store.create_token(&token).await?;
        debug!(
            "Minted {} token for client {} ({} scopes)",
            token.kind,
            grantee.client_id,
            token.scope.len()
        );
        Ok(token)
    }

    /// Mint an access token. `Offline` access also mints a refresh token,
    /// which the access token references; `refreshed_from` records the
    /// refresh token an access token was exchanged for.
    pub async fn issue(
        &self,
        grantee: Grantee<'_>,
        scope: Vec<String>,
        access_type: AccessType,
        refreshed_from: Option<&str>,
    ) -> StoreResult<Issued> {
        let refresh = match access_type {
            AccessType::Offline => Some(
                self.mint(
                    TokenKind::Refresh,
                    grantee,
                    scope.clone(),
                    self.config.refresh_token_ttl(),
                )
                .await?,
            ),
            AccessType::Online => None,
        };

        let refresh_token = refresh
            .as_ref()
            .map(|token| token.id.clone())
            .or_else(|| refreshed_from.map(str::to_string));
        let access = self
            .mint(
                TokenKind::Bearer { refresh_token },
                grantee,
                scope,
                self.config.access_token_ttl(),
            )
            .await?;

        Ok(Issued { access, refresh })
    }

    /// Introspect a live token. Unknown and expired ids both read as NotFound.
    pub async fn introspect(&self, id: &str) -> StoreResult<TokenInfo> {
        let token = self.store.get_token(id).await?;
        Ok(TokenInfo {
            audience: token.client_id.clone().unwrap_or_default(),
            expires_in: expires_in(&token),
            token_type: token.kind.name().to_string(),
            userid: token.user_id,
            scope: token.scope,
        })
    }

    /// Delete a live token. Access tokens issued from a revoked refresh token
    /// stay valid until they expire.
    pub async fn revoke(&self, id: &str) -> StoreResult<()> {
        let token = self.store.get_token(id).await?;
        self.store.delete_token(&token.id).await?;
        debug!("Revoked {} token", token.kind);
        Ok(())
    }
}
