use crate::errors::ApiError;
use crate::headers::presets;
use crate::oauth::identity::bearer_token;
use crate::oauth::lifecycle::TokenLifecycle;
use crate::oauth::models::TokenInfo;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use heimdall_store::StoreError;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct TokenInfoParams {
    /// Token to look up; falls back to the Bearer Authorization header
    pub access_token: Option<String>,
}

fn requested_token(params: TokenInfoParams, headers: &HeaderMap) -> Result<String, ApiError> {
    params
        .access_token
        .filter(|token| !token.is_empty())
        .or_else(|| bearer_token(headers))
        .ok_or_else(|| ApiError::bad_request("Missing access_token"))
}

fn invalid_token(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound => ApiError::not_found("Invalid token"),
        other => other.into(),
    }
}

async fn introspect(state: &AppState, token: &str) -> Result<Response, ApiError> {
    let info = TokenLifecycle::new(state.store.as_ref(), &state.config.oauth)
        .introspect(token)
        .await
        .map_err(invalid_token)?;
    Ok(Json(info).into_response())
}

/// Every `/tokeninfo` answer, errors included, is marked uncacheable
async fn no_store(response: Response) -> Response {
    presets::no_store().applied(response)
}

/// Describe a live token
#[utoipa::path(
    get,
    path = "/tokeninfo",
    tag = OAUTH_TAG,
    params(TokenInfoParams),
    responses(
        (status = 200, description = "Token is valid", body = TokenInfo),
        (status = 400, description = "No token supplied"),
        (status = 404, description = "Token is unknown or expired")
    )
)]
pub(crate) async fn tokeninfo_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenInfoParams>,
) -> Result<Response, ApiError> {
    let token = requested_token(params, &headers)?;
    introspect(&state, &token).await
}

/// Describe a live token, with the token sent as a form field
#[utoipa::path(
    post,
    path = "/tokeninfo",
    tag = OAUTH_TAG,
    request_body(content = TokenInfoParams, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token is valid", body = TokenInfo),
        (status = 400, description = "No token supplied"),
        (status = 404, description = "Token is unknown or expired")
    )
)]
pub(crate) async fn tokeninfo_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenInfoParams>, FormRejection>,
) -> Result<Response, ApiError> {
    let params = form.map(|Form(params)| params).unwrap_or_default();
    let token = requested_token(params, &headers)?;
    introspect(&state, &token).await
}

/// Revoke a token. Tokens minted from a revoked refresh token stay valid.
#[utoipa::path(
    delete,
    path = "/tokeninfo",
    tag = OAUTH_TAG,
    params(TokenInfoParams),
    responses(
        (status = 204, description = "Token revoked"),
        (status = 400, description = "No token supplied"),
        (status = 404, description = "Token is unknown or expired")
    )
)]
pub(crate) async fn tokeninfo_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenInfoParams>,
) -> Result<StatusCode, ApiError> {
    let token = requested_token(params, &headers)?;
    TokenLifecycle::new(state.store.as_ref(), &state.config.oauth)
        .revoke(&token)
        .await
        .map_err(invalid_token)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tokeninfo",
            get(tokeninfo_get)
                .post(tokeninfo_post)
                .delete(tokeninfo_delete),
        )
        .route_layer(middleware::map_response(no_store))
}
