//! Token lifetimes

use chrono::Duration;
use confique::Config;

const HUNDRED_YEARS_SECS: u64 = 100 * 365 * 24 * 60 * 60;
// Keeps `now + ttl` representable
const MAX_TTL_SECS: u64 = 100 * HUNDRED_YEARS_SECS;

/// Lifetimes of the records minted by the authorization server, in seconds
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Sliding lifetime of a login session (default: 14400 = 4 hours)
    #[config(env = "HEIMDALL_OAUTH_SESSION_DURATION", default = 14400)]
    pub session_duration: u64,

    /// Access token lifetime (default: 3600 = 1 hour)
    #[config(env = "HEIMDALL_OAUTH_ACCESS_TOKEN_DURATION", default = 3600)]
    pub access_token_duration: u64,

    /// Refresh token lifetime (default: 100 years)
    #[config(env = "HEIMDALL_OAUTH_REFRESH_TOKEN_DURATION", default = 3153600000_u64)]
    pub refresh_token_duration: u64,

    /// Authorization code lifetime (default: 600 = 10 minutes)
    #[config(env = "HEIMDALL_OAUTH_AUTH_CODE_DURATION", default = 600)]
    pub auth_code_duration: u64,

    /// How long a pending consent prompt stays answerable (default: 300 = 5 minutes)
    #[config(env = "HEIMDALL_OAUTH_CONSENT_DURATION", default = 300)]
    pub consent_duration: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            session_duration: 4 * 60 * 60,
            access_token_duration: 60 * 60,
            refresh_token_duration: HUNDRED_YEARS_SECS,
            auth_code_duration: 10 * 60,
            consent_duration: 5 * 60,
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_TTL_SECS) as i64)
}

impl OAuthConfig {
    pub fn session_ttl(&self) -> Duration {
        seconds(self.session_duration)
    }

    pub fn access_token_ttl(&self) -> Duration {
        seconds(self.access_token_duration)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        seconds(self.refresh_token_duration)
    }

    pub fn auth_code_ttl(&self) -> Duration {
        seconds(self.auth_code_duration)
    }

    pub fn consent_ttl(&self) -> Duration {
        seconds(self.consent_duration)
    }
}
