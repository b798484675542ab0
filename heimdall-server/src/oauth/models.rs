//! OAuth 2.0 request/response structures and error vocabulary

use axum::http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use heimdall_store::StoreError;
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::TOKEN_ERROR_URI;
use crate::headers::presets;

/// Token endpoint request, every grant type's parameters in one form
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// authorization_code, client_credentials, refresh_token or password
    pub grant_type: Option<String>,
    /// Client identifier, when not sent with Basic authentication
    pub client_id: Option<String>,
    /// Client secret, when not sent with Basic authentication
    pub client_secret: Option<String>,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// Redirect URI the code was issued for (authorization_code grant)
    pub redirect_uri: Option<String>,
    /// Refresh token id (refresh_token grant)
    pub refresh_token: Option<String>,
    /// Resource owner username (password grant)
    pub username: Option<String>,
    /// Resource owner password (password grant)
    pub password: Option<String>,
    /// Requested scopes, space-separated
    pub scope: Option<String>,
    /// "offline" also issues a refresh token (password grant)
    pub access_type: Option<String>,
}

/// Successful token endpoint response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    /// Granted scopes, space-separated
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Introspection result for a live token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TokenInfo {
    /// Client the token was issued to
    pub audience: String,
    pub scope: Vec<String>,
    /// Resource owner, absent for client-only tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userid: Option<String>,
    pub expires_in: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Error codes of the token endpoint (RFC 6749 section 5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    ServerError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::ServerError => "server_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClient => StatusCode::UNAUTHORIZED,
            Self::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Error body returned by the token endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: String,
    pub error_uri: String,
}

/// Token endpoint failure
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {}", .code.as_str(), .description)]
pub struct OAuthError {
    pub code: OAuthErrorCode,
    pub description: String,
    /// Answer `invalid_client` with a Basic challenge
    pub challenge: bool,
}

impl OAuthError {
    fn new(code: OAuthErrorCode, description: &str) -> Self {
        Self {
            code,
            description: description.to_string(),
            challenge: false,
        }
    }

    pub fn invalid_request(description: &str) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: &str) -> Self {
        Self::new(OAuthErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: &str) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description)
    }

    pub fn unauthorized_client(description: &str) -> Self {
        Self::new(OAuthErrorCode::UnauthorizedClient, description)
    }

    pub fn unsupported_grant_type() -> Self {
        Self::new(
            OAuthErrorCode::UnsupportedGrantType,
            "Grant type must be one of authorization_code, client_credentials, refresh_token or password",
        )
    }

    pub fn server_error() -> Self {
        Self::new(OAuthErrorCode::ServerError, "Internal storage error")
    }

    /// Challenge with `WWW-Authenticate` when the caller sent an Authorization header
    pub fn with_challenge(mut self, authorization_present: bool) -> Self {
        self.challenge = authorization_present;
        self
    }
}

/// Storage failures surface as `server_error` without their text
impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        error!("Storage failure on token endpoint: {}", err);
        Self::server_error()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = OAuthErrorBody {
            error: self.code.as_str().to_string(),
            error_description: self.description,
            error_uri: TOKEN_ERROR_URI.to_string(),
        };
        let mut response = (self.code.status_code(), Json(body)).into_response();
        if self.code == OAuthErrorCode::InvalidClient && self.challenge {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="Token""#),
            );
        }
        presets::no_store().applied(response)
    }
}

/// Authorize endpoint failures raised before the redirect URI can be trusted
#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl IntoResponse for AuthorizeError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Storage(err) => {
                error!("Storage failure on authorize endpoint: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal storage error").into_response()
            }
        }
    }
}
