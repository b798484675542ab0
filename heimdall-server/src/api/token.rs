use crate::headers::presets;
use crate::oauth::grant::{ClientCredentials, GrantEngine};
use crate::oauth::identity::basic_credentials;
use crate::oauth::models::{OAuthError, OAuthErrorBody, TokenRequest, TokenResponse};
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use log::debug;

/// Token endpoint for every supported grant type.
///
/// Client credentials may be sent with HTTP Basic authentication or as
/// `client_id`/`client_secret` form fields; Basic wins when both are present.
#[utoipa::path(
    post,
    path = "/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = OAuthErrorBody),
        (status = 401, description = "Client authentication failed", body = OAuthErrorBody),
        (status = 500, description = "Storage failure", body = OAuthErrorBody)
    )
)]
pub(crate) async fn token_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Response, OAuthError> {
    let challenge = headers.contains_key(AUTHORIZATION);
    let Form(request) = form.map_err(|rejection| {
        debug!("Rejected token request body: {}", rejection);
        OAuthError::invalid_request("Expected an application/x-www-form-urlencoded body")
            .with_challenge(challenge)
    })?;

    let credentials = ClientCredentials::new(basic_credentials(&headers), &request);
    let engine = GrantEngine::new(
        state.store.as_ref(),
        &state.config.oauth,
        state.scope_policy.as_ref(),
    );
    let issued = engine
        .exchange(&request, &credentials)
        .await
        .map_err(|e| e.with_challenge(challenge))?;

    Ok(presets::no_store().applied(Json(issued.response()).into_response()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/token", post(token_handler))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::TestFixture;
    use axum::http::header::{CACHE_CONTROL, PRAGMA, WWW_AUTHENTICATE};
    use http::StatusCode;

    #[tokio::test]
    async fn test_client_credentials_with_basic() {
        let fixture = TestFixture::new().await;
        let resp = fixture
            .post_form(
                "/token",
                "grant_type=client_credentials&scope=read",
                &[("authorization", &TestFixture::basic("app", "app-secret"))],
            )
            .await;
        resp.assert_ok();
        assert_eq!(resp.json["token_type"], "Bearer");
        assert_eq!(resp.json["scope"], "read");
        assert_eq!(resp.json["expires_in"], 3600);
        assert!(resp.json.get("refresh_token").is_none());
        assert_eq!(resp.headers[CACHE_CONTROL], "no-store");
        assert_eq!(resp.headers[PRAGMA], "no-cache");
    }

    #[tokio::test]
    async fn test_bad_client_secret_gets_challenge() {
        let fixture = TestFixture::new().await;
        let resp = fixture
            .post_form(
                "/token",
                "grant_type=client_credentials",
                &[("authorization", &TestFixture::basic("app", "wrong"))],
            )
            .await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(resp.json["error"], "invalid_client");
        assert_eq!(resp.headers[WWW_AUTHENTICATE], r#"Basic realm="Token""#);

        // Form credentials get no challenge
        let resp = fixture
            .post_form(
                "/token",
                "grant_type=client_credentials&client_id=app&client_secret=wrong",
                &[],
            )
            .await;
        resp.assert_status(StatusCode::UNAUTHORIZED);
        assert!(!resp.headers.contains_key(WWW_AUTHENTICATE));
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let fixture = TestFixture::new().await;
        let resp = fixture.post_form("/token", "grant_type=magic", &[]).await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json["error"], "unsupported_grant_type");
        assert_eq!(resp.json["error_uri"], "https://tools.ietf.org/html/rfc6749");
    }

    #[tokio::test]
    async fn test_json_body_is_invalid_request() {
        let fixture = TestFixture::new().await;
        let resp = fixture
            .post_json("/token", &serde_json::json!({"grant_type": "password"}))
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_password_grant_on_external_client() {
        let fixture = TestFixture::new().await;
        let resp = fixture
            .post_form(
                "/token",
                "grant_type=password&client_id=app&client_secret=app-secret&username=alice&password=wonderland",
                &[],
            )
            .await;
        resp.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(resp.json["error"], "unauthorized_client");
    }

    #[tokio::test]
    async fn test_password_grant_then_refresh() {
        let fixture = TestFixture::new().await;
        let body = format!(
            "grant_type=password&client_id=heimdall&client_secret={}&username=alice&password=wonderland&scope=read%20write&access_type=offline",
            TestFixture::INTERNAL_SECRET
        );
        let resp = fixture.post_form("/token", &body, &[]).await;
        resp.assert_ok();
        let refresh = resp.json["refresh_token"].as_str().unwrap().to_string();

        let body = format!(
            "grant_type=refresh_token&refresh_token={refresh}&scope=write&client_id=heimdall&client_secret={}",
            TestFixture::INTERNAL_SECRET
        );
        let resp = fixture.post_form("/token", &body, &[]).await;
        resp.assert_ok();
        assert_eq!(resp.json["scope"], "write");
        assert!(resp.json.get("refresh_token").is_none());
    }
}
