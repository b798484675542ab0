pub(crate) mod authorize;
pub(crate) mod health;
mod html;
pub(crate) mod login;
pub(crate) mod token;
pub(crate) mod tokeninfo;
pub(crate) mod whoami;

use crate::oauth::protect::{protect, require_authenticated, ProtectionGate};
use crate::state::AppState;
use axum::http::header::LOCATION;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{middleware, Router};
use log::warn;

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(login::router())
        .merge(authorize::router())
        .merge(token::router())
        .merge(tokeninfo::router())
        .merge(protected_routes(state))
}

/// Routes that only an authenticated caller may reach
fn protected_routes(state: &AppState) -> Router<AppState> {
    let gate = ProtectionGate::new(state.clone(), require_authenticated);
    whoami::router().route_layer(middleware::from_fn_with_state(gate, protect))
}

/// 302 to `location`
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(_) => {
            warn!("Refusing to redirect to an invalid location");
            (StatusCode::BAD_REQUEST, "Invalid redirect location").into_response()
        }
    }
}
