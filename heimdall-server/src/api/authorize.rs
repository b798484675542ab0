use crate::api::found;
use crate::api::html::consent_page;
use crate::headers::presets;
use crate::oauth::consent::{AuthorizeOutcome, AuthorizeParams, ConsentEngine};
use crate::oauth::identity::Identity;
use crate::oauth::models::AuthorizeError;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
// Aliased so utoipa's axum_extras does not try to infer a `ToSchema` body from `Bytes`.
use axum::body::Bytes as RawBody;
use axum::extract::State;
use axum::http::Uri;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use url::form_urlencoded;

/// Authorization endpoint for the `code` and `token` response types.
///
/// Parameters are read from the query string and, for POST, from the form
/// body. Anonymous callers are sent to `/login` and brought back afterwards.
#[utoipa::path(
    get,
    path = "/authorize",
    tag = OAUTH_TAG,
    params(
        ("response_type" = String, Query, description = "code or token"),
        ("client_id" = String, Query, description = "Requesting client"),
        ("redirect_uri" = String, Query, description = "One of the client's registered redirect URIs"),
        ("scope" = Option<String>, Query, description = "Space separated scopes"),
        ("state" = Option<String>, Query, description = "Echoed back in the final redirect"),
        ("access_type" = Option<String>, Query, description = "online or offline")
    ),
    responses(
        (status = 200, description = "Consent form", content_type = "text/html"),
        (status = 302, description = "Redirect to login, or back to the client"),
        (status = 400, description = "Invalid request", content_type = "text/plain")
    )
)]
pub(crate) async fn authorize_handler(
    State(state): State<AppState>,
    identity: Identity,
    uri: Uri,
    body: RawBody,
) -> Result<Response, AuthorizeError> {
    let params = AuthorizeParams::parse(uri.query(), &body);
    let return_to = uri
        .path_and_query()
        .map(|path| path.as_str())
        .unwrap_or("/authorize");

    let engine = ConsentEngine::new(
        state.store.as_ref(),
        &state.config.oauth,
        state.scope_policy.as_ref(),
    );
    let outcome = engine
        .authorize(&params, identity.user.as_ref(), return_to)
        .await?;

    Ok(match outcome {
        AuthorizeOutcome::LoginRequired { return_to } => {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("return_to", &return_to)
                .finish();
            found(&format!("/login?{query}"))
        }
        AuthorizeOutcome::Prompt(prompt) => {
            presets::private_no_cache().applied(Html(consent_page(&prompt)).into_response())
        }
        AuthorizeOutcome::Redirect(target) => presets::no_store().applied(found(target.as_str())),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/authorize", get(authorize_handler).post(authorize_handler))
}
