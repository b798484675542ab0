use crate::oauth::identity::RequestIdentity;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::routing::get;
use axum::{Extension, Json, Router};

/// The caller as resolved by the protection gate
#[utoipa::path(
    get,
    path = "/whoami",
    tag = OAUTH_TAG,
    responses(
        (status = 200, description = "Authenticated caller", body = RequestIdentity),
        (status = 403, description = "Not authenticated")
    )
)]
pub(crate) async fn whoami(Extension(identity): Extension<RequestIdentity>) -> Json<RequestIdentity> {
    Json(identity)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/whoami", get(whoami))
}
