use axum::http::HeaderValue;
use axum::response::Response;
use http::header::{CACHE_CONTROL, PRAGMA};

/// Cache-Control directives
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub no_cache: bool,
    pub no_store: bool,
    pub private: bool,
    pub max_age: Option<u32>,
}

impl CacheControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_store(mut self) -> Self {
        self.no_store = true;
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn to_header_value(&self) -> HeaderValue {
        let mut parts = Vec::new();

        if self.no_store {
            parts.push("no-store".to_string());
        }
        if self.no_cache {
            parts.push("no-cache".to_string());
        }
        if self.private {
            parts.push("private".to_string());
        }
        if let Some(max_age) = self.max_age {
            parts.push(format!("max-age={max_age}"));
        }

        HeaderValue::from_str(&parts.join(", ")).unwrap_or(HeaderValue::from_static(""))
    }
}

/// Helper struct for setting cache-related headers
#[derive(Debug, Clone, Default)]
pub struct CacheHeaders {
    cache_control: CacheControl,
    pragma_no_cache: bool,
}

impl CacheHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = cache_control;
        self
    }

    /// Add the HTTP/1.0 `Pragma: no-cache` header
    pub fn pragma_no_cache(mut self) -> Self {
        self.pragma_no_cache = true;
        self
    }

    /// Apply headers to a response
    pub fn apply<B>(&self, response: &mut Response<B>) {
        let headers = response.headers_mut();

        headers.insert(CACHE_CONTROL, self.cache_control.to_header_value());

        if self.pragma_no_cache || self.cache_control.no_cache {
            headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        }
    }

    /// Apply headers and hand the response back, for use in handler tails
    pub fn applied<B>(&self, mut response: Response<B>) -> Response<B> {
        self.apply(&mut response);
        response
    }
}

/// Common cache control presets
pub mod presets {
    use super::*;

    /// Responses carrying credentials: `Cache-Control: no-store` and `Pragma: no-cache`
    pub fn no_store() -> CacheHeaders {
        CacheHeaders::new()
            .cache_control(CacheControl::new().no_store())
            .pragma_no_cache()
    }

    /// Login and consent pages, which embed per-user one-time values
    pub fn private_no_cache() -> CacheHeaders {
        CacheHeaders::new().cache_control(CacheControl::new().private().no_cache().max_age(0))
    }
}
