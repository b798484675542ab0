//! Token endpoint grant types.
//!
//! Each grant validates its parameters in a fixed order and stops at the
//! first failure. Nothing is minted until every check has passed.

use heimdall_store::{
    AccessType, Client, ClientStore, Store, StoreError, TokenKind, TokenStore, UserStore,
};
use log::{info, warn};

use super::lifecycle::{Grantee, Issued, TokenLifecycle};
use super::models::{OAuthError, TokenRequest};
use super::scope::{filter_scopes, ScopePolicy};
use super::split_scopes;
use crate::config::OAuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantType {
    AuthorizationCode,
    ClientCredentials,
    RefreshToken,
    Password,
}

impl GrantType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "client_credentials" => Some(Self::ClientCredentials),
            "refresh_token" => Some(Self::RefreshToken),
            "password" => Some(Self::Password),
            _ => None,
        }
    }
}

/// Client credentials from Basic authentication, or else from the form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub id: Option<String>,
    pub secret: Option<String>,
}

impl ClientCredentials {
    pub fn new(basic: Option<(String, String)>, request: &TokenRequest) -> Self {
        match basic {
            Some((id, secret)) => Self {
                id: non_empty(Some(&id)).map(str::to_string),
                secret: non_empty(Some(&secret)).map(str::to_string),
            },
            None => Self {
                id: non_empty(request.client_id.as_ref()).map(str::to_string),
                secret: non_empty(request.client_secret.as_ref()).map(str::to_string),
            },
        }
    }

    fn pair(&self) -> Option<(&str, &str)> {
        Some((self.id.as_deref()?, self.secret.as_deref()?))
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

pub struct GrantEngine<'a> {
    store: &'a dyn Store,
    lifecycle: TokenLifecycle<'a>,
    scopes: &'a dyn ScopePolicy,
}

impl<'a> GrantEngine<'a> {
    pub fn new(store: &'a dyn Store, config: &'a OAuthConfig, scopes: &'a dyn ScopePolicy) -> Self {
        Self {
            store,
            lifecycle: TokenLifecycle::new(store, config),
            scopes,
        }
    }

    pub async fn exchange(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<Issued, OAuthError> {
        let grant_type = non_empty(request.grant_type.as_ref())
            .and_then(GrantType::parse)
            .ok_or_else(OAuthError::unsupported_grant_type)?;

        match grant_type {
            GrantType::AuthorizationCode => self.authorization_code(request, credentials).await,
            GrantType::ClientCredentials => self.client_credentials(request, credentials).await,
            GrantType::RefreshToken => self.refresh_token(request, credentials).await,
            GrantType::Password => self.password(request, credentials).await,
        }
    }

    async fn authorization_code(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<Issued, OAuthError> {
        let client_id = credentials
            .id
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_client("Required param client_id is missing"))?;
        let code_id = non_empty(request.code.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("Required param code is missing"))?;
        let redirect_uri = non_empty(request.redirect_uri.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("Required param redirect_uri is missing"))?;

        let client = self.client(client_id).await?;
        if client.is_confidential() {
            if let Some(secret) = credentials.secret.as_deref() {
                if secret != client.secret {
                    return Err(OAuthError::invalid_client(
                        "Client authentication failed",
                    ));
                }
            }
        }

        let code = match self.store.get_token(code_id).await {
            Ok(code) if matches!(code.kind, TokenKind::AuthorizationCode { .. }) => code,
            Ok(_) | Err(StoreError::NotFound) => {
                return Err(OAuthError::invalid_grant(
                    "Invalid or expired authorization code",
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if code.client_id.as_deref() != Some(client_id) {
            return Err(OAuthError::invalid_grant(
                "client_id does not match the authorization code",
            ));
        }
        if !client.has_redirect_uri(redirect_uri) {
            return Err(OAuthError::invalid_grant(
                "The redirect_uri is not registered for this client",
            ));
        }

        // Exactly one concurrent exchange of the same code gets past here
        let code = match self.store.consume_token(code_id).await {
            Ok(code) => code,
            Err(StoreError::NotFound) => {
                warn!("Authorization code for client {} was already used", client_id);
                return Err(OAuthError::invalid_grant(
                    "Invalid or expired authorization code",
                ));
            }
            Err(e) => return Err(e.into()),
        };

        let grantee = Grantee {
            client_id,
            user_id: code.user_id.as_deref(),
        };
        let issued = self
            .lifecycle
            .issue(grantee, code.scope.clone(), code.access_type(), None)
            .await?;
        info!("Exchanged authorization code for client {}", client_id);
        Ok(issued)
    }

    async fn client_credentials(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<Issued, OAuthError> {
        let (id, secret) = credentials.pair().ok_or_else(|| {
            OAuthError::invalid_client("Client authentication is required")
        })?;
        let client = self.verify_client(id, secret).await?;

        let requested = split_scopes(request.scope.as_deref());
        let scope = filter_scopes(self.scopes, &requested, &client, None);
        let grantee = Grantee {
            client_id: &client.id,
            user_id: None,
        };
        let issued = self
            .lifecycle
            .issue(grantee, scope, AccessType::Online, None)
            .await?;
        info!("Issued client credentials token to {}", client.id);
        Ok(issued)
    }

    async fn refresh_token(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<Issued, OAuthError> {
        let refresh_id = non_empty(request.refresh_token.as_ref())
            .ok_or_else(|| OAuthError::invalid_request("Required param refresh_token is missing"))?;

        let refresh = match self.store.get_token(refresh_id).await {
            Ok(token) if token.kind == TokenKind::Refresh => token,
            Ok(_) | Err(StoreError::NotFound) => {
                return Err(OAuthError::invalid_grant(
                    "Refresh token is invalid, expired or revoked",
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let owner_id = refresh.client_id.as_deref().unwrap_or_default();
        let client = match self.store.get_client(owner_id).await {
            Ok(client) => client,
            Err(StoreError::NotFound) => {
                return Err(OAuthError::invalid_client(
                    "The refresh token does not belong to a known client",
                ))
            }
            Err(e) => return Err(e.into()),
        };

        if client.is_confidential() {
            let (id, secret) = credentials.pair().ok_or_else(|| {
                OAuthError::invalid_client("Client authentication is required")
            })?;
            let authenticated = self.verify_client(id, secret).await?;
            if authenticated.id != client.id {
                return Err(OAuthError::invalid_client(
                    "The refresh token was issued to another client",
                ));
            }
        }

        // Never wider than the original grant
        let requested = split_scopes(request.scope.as_deref());
        let scope = if requested.is_empty() {
            refresh.scope.clone()
        } else {
            refresh
                .scope
                .iter()
                .filter(|scope| requested.contains(scope))
                .cloned()
                .collect()
        };

        let grantee = Grantee {
            client_id: &client.id,
            user_id: refresh.user_id.as_deref(),
        };
        let issued = self
            .lifecycle
            .issue(grantee, scope, AccessType::Online, Some(&refresh.id))
            .await?;
        info!("Refreshed access token for client {}", client.id);
        Ok(issued)
    }

    async fn password(
        &self,
        request: &TokenRequest,
        credentials: &ClientCredentials,
    ) -> Result<Issued, OAuthError> {
        let (id, secret) = credentials.pair().ok_or_else(|| {
            OAuthError::invalid_request("Required param client_id/client_secret is missing")
        })?;
        let client = self.verify_client(id, secret).await?;
        if !client.internal || !client.is_confidential() {
            warn!("Password grant refused for client {}", client.id);
            return Err(OAuthError::unauthorized_client(
                "Only internal confidential clients may use the password grant",
            ));
        }

        let username = request.username.as_deref().unwrap_or_default();
        let password = request.password.as_deref().unwrap_or_default();
        let user = match self.store.verify_user(username, password).await {
            Ok(user) => user,
            Err(StoreError::InvalidCredentials | StoreError::NotFound) => {
                return Err(OAuthError::invalid_grant("Invalid user credentials"))
            }
            Err(e) => return Err(e.into()),
        };

        let requested = split_scopes(request.scope.as_deref());
        let scope = filter_scopes(self.scopes, &requested, &client, Some(&user));
        let grantee = Grantee {
            client_id: &client.id,
            user_id: Some(&user.id),
        };
        let access_type = AccessType::parse(request.access_type.as_deref());
        let issued = self.lifecycle.issue(grantee, scope, access_type, None).await?;
        info!("Issued password grant token to client {}", client.id);
        Ok(issued)
    }

    async fn client(&self, id: &str) -> Result<Client, OAuthError> {
        match self.store.get_client(id).await {
            Ok(client) => Ok(client),
            Err(StoreError::NotFound) => Err(OAuthError::invalid_client("Unknown client")),
            Err(e) => Err(e.into()),
        }
    }

    async fn verify_client(&self, id: &str, secret: &str) -> Result<Client, OAuthError> {
        match self.store.verify_client(id, secret).await {
            Ok(client) => Ok(client),
            Err(StoreError::InvalidCredentials | StoreError::NotFound) => {
                Err(OAuthError::invalid_client("Client authentication failed"))
            }
            Err(e) => Err(e.into()),
        }
    }
}
