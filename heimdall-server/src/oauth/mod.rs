//! OAuth 2.0 authorization server core (RFC 6749)
//!
//! ## Components
//! - [`identity`]: resolves Basic, Bearer and session-cookie credentials into one identity
//! - [`protect`]: gates handlers behind an injectable authorization policy
//! - [`consent`]: the authorize endpoint and its consent workflow
//! - [`grant`]: the token endpoint grant types
//! - [`lifecycle`]: minting, introspection and revocation of token records
//! - [`scope`]: the injectable scope policy
//!
//! Tokens are opaque random ids resolved through the record store; expiry is
//! checked lazily on every read.

pub mod consent;
pub mod grant;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod protect;
pub mod scope;

/// The built-in client that owns login sessions and Basic user logins
pub const INTERNAL_CLIENT_ID: &str = "heimdall";

/// Cookie carrying the session token id
pub const SESSION_COOKIE: &str = "session-id";

/// `error_uri` attached to token endpoint errors
pub const TOKEN_ERROR_URI: &str = "https://tools.ietf.org/html/rfc6749";

/// `error_uri` attached to a denied authorization redirect
pub const ACCESS_DENIED_URI: &str = "http://tools.ietf.org/html/rfc6749";

/// Split a space-delimited scope parameter, dropping empty entries
pub fn split_scopes(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_scopes() {
        assert_eq!(split_scopes(Some("read  write ")), vec!["read", "write"]);
        assert!(split_scopes(Some("   ")).is_empty());
        assert!(split_scopes(None).is_empty());
    }
}
