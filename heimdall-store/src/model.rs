use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Generate an opaque 128-bit random identifier, URL-safe base64 encoded
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a client secret (256 bits)
pub fn new_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Public,
    #[default]
    Confidential,
}

impl ClientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientType::Public => "public",
            ClientType::Confidential => "confidential",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(ClientType::Public),
            "confidential" => Some(ClientType::Confidential),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub secret: String,
    pub name: String,
    #[serde(rename = "type")]
    pub client_type: ClientType,
    /// Internal clients are trusted: they skip consent and may use the password grant
    pub internal: bool,
    pub redirect_uris: Vec<String>,
}

impl Client {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: new_secret(),
            name: String::new(),
            client_type: ClientType::default(),
            internal: false,
            redirect_uris: Vec::new(),
        }
    }

    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }

    /// Byte-exact match against the registered redirect URIs
    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }
}

/// Username plus a salted SHA-256 digest of the password
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub username: String,
    pub salt: String,
    pub password_hash: String,
}

impl Login {
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        let salt = new_id();
        let password_hash = hash_password(&salt, password);
        Self {
            username: username.into(),
            salt,
            password_hash,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        hash_password(&self.salt, password) == self.password_hash
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    /// Previously granted scopes, keyed by client id
    #[serde(default)]
    pub consents: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
}

impl User {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            consents: HashMap::new(),
            login: None,
        }
    }

    pub fn set_password(&mut self, username: impl Into<String>, password: &str) {
        self.login = Some(Login::new(username, password));
    }

    pub fn has_consent(&self, client_id: &str, scope: &str) -> bool {
        self.consents
            .get(client_id)
            .is_some_and(|granted| granted.iter().any(|s| s == scope))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    #[default]
    Online,
    Offline,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Online => "online",
            AccessType::Offline => "offline",
        }
    }

    /// Anything but an explicit "offline" is online
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("offline") => AccessType::Offline,
            _ => AccessType::Online,
        }
    }
}

/// Token type tag with the fields only that type carries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TokenKind {
    Basic,
    Session,
    Bearer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
    },
    Refresh,
    AuthorizationCode {
        #[serde(default)]
        access_type: AccessType,
    },
    UserConsent,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Basic => "Basic",
            TokenKind::Session => "Session",
            TokenKind::Bearer { .. } => "Bearer",
            TokenKind::Refresh => "Refresh",
            TokenKind::AuthorizationCode { .. } => "AuthorizationCode",
            TokenKind::UserConsent => "UserConsent",
        }
    }

    /// Rebuild a kind from its tag and the optional type-specific columns
    pub fn from_parts(
        name: &str,
        refresh_token: Option<String>,
        access_type: Option<&str>,
    ) -> Option<Self> {
        let kind = match name {
            "Basic" => TokenKind::Basic,
            "Session" => TokenKind::Session,
            "Bearer" => TokenKind::Bearer { refresh_token },
            "Refresh" => TokenKind::Refresh,
            "AuthorizationCode" => TokenKind::AuthorizationCode {
                access_type: AccessType::parse(access_type),
            },
            "UserConsent" => TokenKind::UserConsent,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(flatten)]
    pub kind: TokenKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub scope: Vec<String>,
}

impl Token {
    pub fn new(id: impl Into<String>, kind: TokenKind) -> Self {
        Self {
            id: id.into(),
            kind,
            user_id: None,
            client_id: None,
            expires: Utc::now(),
            scope: Vec::new(),
        }
    }

    /// Expired once `expires` lies strictly in the past
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn access_type(&self) -> AccessType {
        match self.kind {
            TokenKind::AuthorizationCode { access_type } => access_type,
            _ => AccessType::Online,
        }
    }

    pub fn refresh_token(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Bearer { refresh_token } => refresh_token.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_ids_are_unique_and_128_bit() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), 16);
    }

    #[test]
    fn test_login_verify() {
        let login = Login::new("alice", "wonderland");
        assert!(login.verify("wonderland"));
        assert!(!login.verify("Wonderland"));
        assert_ne!(login.password_hash, "wonderland");
    }

    #[test]
    fn test_same_password_different_salt() {
        let a = Login::new("alice", "pw");
        let b = Login::new("bob", "pw");
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[test]
    fn test_token_expiry_boundary() {
        let now = Utc::now();
        let mut token = Token::new("t", TokenKind::Session);
        token.expires = now;
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::milliseconds(1)));
    }

    #[test]
    fn test_token_json_carries_type_tag() {
        let mut token = Token::new(
            "t",
            TokenKind::Bearer {
                refresh_token: Some("r".to_string()),
            },
        );
        token.scope = vec!["read".to_string()];
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["type"], "Bearer");
        assert_eq!(json["refresh_token"], "r");

        let back: Token = serde_json::from_value(json).unwrap();
        assert_eq!(back, token);
    }

    #[test]
    fn test_kind_from_parts() {
        assert_eq!(
            TokenKind::from_parts("AuthorizationCode", None, Some("offline")),
            Some(TokenKind::AuthorizationCode {
                access_type: AccessType::Offline
            })
        );
        assert_eq!(TokenKind::from_parts("Nope", None, None), None);
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let mut client = Client::new("c");
        client.redirect_uris = vec!["https://app/cb".to_string()];
        assert!(client.has_redirect_uri("https://app/cb"));
        assert!(!client.has_redirect_uri("https://app/cb/"));
        assert!(!client.has_redirect_uri("https://APP/cb"));
    }
}
