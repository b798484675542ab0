use crate::api::found;
use crate::api::html::login_page;
use crate::headers::presets;
use crate::oauth::identity::Identity;
use crate::oauth::lifecycle::{Grantee, TokenLifecycle};
use crate::oauth::{INTERNAL_CLIENT_ID, SESSION_COOKIE};
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::header::{AUTHORIZATION, SET_COOKIE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use cookie::Cookie;
use heimdall_store::{StoreError, TokenKind, UserStore};
use log::{info, warn};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::errors::ApiError;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// Local path to continue to after signing in
    pub return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LoginForm {
    pub login: Option<String>,
    pub password: Option<String>,
    pub return_to: Option<String>,
}

/// Only same-origin paths are followed after login; anything else goes to `/`
pub(crate) fn safe_return_to(return_to: Option<&str>) -> &str {
    match return_to {
        Some(path)
            if path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\") =>
        {
            path
        }
        _ => "/",
    }
}

fn login_form(return_to: &str, failed: bool, headers: &HeaderMap) -> Response {
    let html = Html(login_page(return_to, failed));
    let response = if failed && headers.contains_key(AUTHORIZATION) {
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, HeaderValue::from_static(r#"Basic realm="Heimdall""#))],
            html,
        )
            .into_response()
    } else {
        html.into_response()
    };
    presets::private_no_cache().applied(response)
}

/// Render the login form, or continue straight away when already signed in
#[utoipa::path(
    get,
    path = "/login",
    tag = OAUTH_TAG,
    params(LoginQuery),
    responses(
        (status = 200, description = "Login form", content_type = "text/html"),
        (status = 302, description = "Already signed in")
    )
)]
pub(crate) async fn login_get(
    identity: Identity,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    let return_to = safe_return_to(query.return_to.as_deref());
    if identity.user.is_some() {
        return found(return_to);
    }
    login_form(return_to, false, &headers)
}

/// Verify the submitted credentials and start a session
#[utoipa::path(
    post,
    path = "/login",
    tag = OAUTH_TAG,
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Signed in, session cookie set"),
        (status = 200, description = "Login failed, form shown again", content_type = "text/html"),
        (status = 401, description = "Login failed with an Authorization header present", content_type = "text/html")
    )
)]
pub(crate) async fn login_post(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Response, ApiError> {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    let return_to = safe_return_to(form.return_to.as_deref());
    if identity.user.is_some() {
        return Ok(found(return_to));
    }

    let (Some(username), Some(password)) = (form.login.as_deref(), form.password.as_deref())
    else {
        return Ok(login_form(return_to, true, &headers));
    };
    let user = match state.store.verify_user(username, password).await {
        Ok(user) => user,
        Err(StoreError::InvalidCredentials | StoreError::NotFound) => {
            warn!("Failed login attempt for '{}'", username);
            return Ok(login_form(return_to, true, &headers));
        }
        Err(e) => return Err(e.into()),
    };

    let lifecycle = TokenLifecycle::new(state.store.as_ref(), &state.config.oauth);
    let grantee = Grantee {
        client_id: INTERNAL_CLIENT_ID,
        user_id: Some(&user.id),
    };
    let session = lifecycle
        .mint(
            TokenKind::Session,
            grantee,
            Vec::new(),
            state.config.oauth.session_ttl(),
        )
        .await?;

    let cookie = Cookie::build((SESSION_COOKIE, session.id))
        .secure(state.config.cookie_secure)
        .http_only(true)
        .path("/")
        .build();
    let cookie = HeaderValue::from_str(&cookie.encoded().to_string())
        .map_err(|_| ApiError::internal("Failed to encode session cookie"))?;

    info!("User {} signed in", user.id);
    let mut response = found(return_to);
    response.headers_mut().append(SET_COOKIE, cookie);
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/login", get(login_get).post(login_post))
}
