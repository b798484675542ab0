use crate::api::{authorize, health, login, token, tokeninfo, whoami};
use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth2 API";

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        health::ready_check,
        login::login_get,
        login::login_post,
        authorize::authorize_handler,
        token::token_handler,
        tokeninfo::tokeninfo_get,
        tokeninfo::tokeninfo_post,
        tokeninfo::tokeninfo_delete,
        whoami::whoami,
    ),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "OAuth2 authorization server endpoints"),
    ),
    info(
        title = "Heimdall API",
        description = "OAuth2 authorization server",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_endpoint_is_documented() {
        let doc = ApiDoc::openapi();
        for path in ["/health", "/ready", "/login", "/authorize", "/token", "/tokeninfo", "/whoami"] {
            assert!(doc.paths.paths.contains_key(path), "{path} is missing");
        }
        let tokeninfo = &doc.paths.paths["/tokeninfo"];
        assert!(tokeninfo.get.is_some());
        assert!(tokeninfo.post.is_some());
        assert!(tokeninfo.delete.is_some());
    }
}
