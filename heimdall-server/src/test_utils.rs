use crate::create_app;
use crate::state::AppState;
use crate::storage::bootstrap;
use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cookie::Cookie;
use heimdall_store::{Client, ClientStore, ClientType, User, UserStore};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use crate::config::BootstrapConfig;
use crate::oauth::SESSION_COOKIE;

/// Test fixture running the full router over an in-memory store.
///
/// Seeded with:
/// - the internal `heimdall` client, secret [`TestFixture::INTERNAL_SECRET`]
/// - `app`, a confidential external client with secret `app-secret` and
///   redirect URI `https://app/cb`
/// - `user-1`, who signs in as `alice` / `wonderland`
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.get_as_user("/whoami").await;
///     response.assert_ok();
///     assert_eq!(response.json["user_id"], "user-1");
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// State shared with the router, for direct store access
    pub state: AppState,
}

impl TestFixture {
    pub const INTERNAL_SECRET: &'static str = "heimdall-secret";

    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let state = crate::state::tests::create_test_state();
        let config = BootstrapConfig {
            client_secret: Some(Self::INTERNAL_SECRET.to_string()),
            ..Default::default()
        };
        bootstrap(state.store.as_ref(), &config)
            .await
            .expect("Failed to bootstrap store");

        let mut app = Client::new("app");
        app.name = "Test App".to_string();
        app.secret = "app-secret".to_string();
        app.client_type = ClientType::Confidential;
        app.redirect_uris = vec!["https://app/cb".to_string()];
        state
            .store
            .create_client(&app)
            .await
            .expect("Failed to create client");

        let mut user = User::new("user-1");
        user.name = "Alice".to_string();
        user.set_password("alice", "wonderland");
        state
            .store
            .create_user(&user)
            .await
            .expect("Failed to create user");

        let app = create_app(state.clone()).await;
        Self { app, state }
    }

    /// Initializes the test logger; repeated calls are no-ops
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// `Authorization` header value for HTTP Basic
    pub fn basic(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    }

    fn build(
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: Body,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(body).expect("Failed to build request")
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        self.request(Method::GET, uri.as_ref(), &[]).await
    }

    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request(Method::GET, uri.as_ref(), headers).await
    }

    /// GET authenticated as the seeded user
    pub async fn get_as_user(&self, uri: impl AsRef<str>) -> TestResponse {
        let basic = Self::basic("alice", "wonderland");
        self.get_with_headers(uri, &[("authorization", &basic)])
            .await
    }

    /// Body-less request with any method
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.send(Self::build(method, uri, headers, Body::empty()))
            .await
    }

    /// POST an `application/x-www-form-urlencoded` body
    pub async fn post_form(
        &self,
        uri: impl AsRef<str>,
        body: &str,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut request = Self::build(
            Method::POST,
            uri.as_ref(),
            headers,
            Body::from(body.to_string()),
        );
        request.headers_mut().insert(
            CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        self.send(request).await
    }

    pub async fn post_form_as_user(&self, uri: impl AsRef<str>, body: &str) -> TestResponse {
        let basic = Self::basic("alice", "wonderland");
        self.post_form(uri, body, &[("authorization", &basic)])
            .await
    }

    pub async fn post_json<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let mut request = Self::build(Method::POST, uri.as_ref(), &[], Body::from(json_body));
        request
            .headers_mut()
            .insert(CONTENT_TYPE, "application/json".parse().unwrap());
        self.send(request).await
    }

    /// Sends a request and collects the whole response
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body).into_owned();
        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            json,
            text,
        }
    }
}

/// Response from a test request with the status, headers and body at hand
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
    /// Raw response body
    pub text: String,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.text
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Value of the session cookie set by this response
    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| Cookie::parse(value).ok())
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string())
    }

    /// Value of a hidden form field in an HTML body
    pub fn hidden_field(&self, name: &str) -> Option<String> {
        let marker = format!("name=\"{name}\" value=\"");
        let start = self.text.find(&marker)? + marker.len();
        let len = self.text[start..].find('"')?;
        Some(self.text[start..start + len].to_string())
    }

    /// The `Location` header as an absolute URL
    pub fn redirect_url(&self) -> Url {
        let location = self.headers[LOCATION]
            .to_str()
            .expect("Location is not ASCII");
        Url::parse(location).expect("Location is not an absolute URL")
    }
}
