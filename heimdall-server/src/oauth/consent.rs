//! Authorize endpoint state machine.
//!
//! A request either arrives fresh ([`ConsentPhase::Initial`]) or as the
//! resubmission of a consent prompt, carrying the consent token minted for
//! that prompt ([`ConsentPhase::Resubmission`]). Both phases settle on a
//! [`ConsentState`], which decides whether the user is prompted, redirected
//! with an error, or redirected with a code or access token.

use std::collections::HashSet;

use heimdall_store::{
    AccessType, Client, ClientStore, Store, StoreError, TokenKind, TokenStore, User, UserStore,
};
use log::{debug, info};
use url::{form_urlencoded, Url};

use super::lifecycle::{Grantee, TokenLifecycle};
use super::models::AuthorizeError;
use super::scope::{filter_scopes, ScopePolicy};
use super::{split_scopes, ACCESS_DENIED_URI};
use crate::config::OAuthConfig;

/// Form field carrying the consent token of a resubmitted prompt
pub const CONSENT_TOKEN_FIELD: &str = "concent_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    Code,
    Token,
}

impl ResponseType {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            Some("code") => Some(Self::Code),
            Some("token") => Some(Self::Token),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentPhase {
    Initial,
    /// A submitted prompt, with the id of the consent token it carried
    Resubmission(String),
}

/// Where consent stands once the request has been evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentState {
    Granted(Vec<String>),
    /// Some approved scopes still need the user's explicit consent
    Pending(Vec<String>),
    Denied,
}

/// Authorize parameters merged from the query string and a form body.
/// Body values win; consent fields are only read from the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Vec<String>,
    pub state: Option<String>,
    pub access_type: AccessType,
    pub phase: ConsentPhase,
    pub authorize: bool,
    pub deny: bool,
    /// Names of the checkboxes submitted as `on`
    pub checked: HashSet<String>,
}

impl AuthorizeParams {
    pub fn parse(query: Option<&str>, body: &[u8]) -> Self {
        let query: Vec<(String, String)> =
            form_urlencoded::parse(query.unwrap_or_default().as_bytes())
                .into_owned()
                .collect();
        let body: Vec<(String, String)> = form_urlencoded::parse(body).into_owned().collect();

        let from_body = |name: &str| {
            body.iter()
                .find(|(key, value)| key == name && !value.is_empty())
                .map(|(_, value)| value.clone())
        };
        let value = |name: &str| {
            from_body(name).or_else(|| {
                query
                    .iter()
                    .find(|(key, value)| key == name && !value.is_empty())
                    .map(|(_, value)| value.clone())
            })
        };

        let phase = match from_body(CONSENT_TOKEN_FIELD) {
            Some(token) => ConsentPhase::Resubmission(token),
            None => ConsentPhase::Initial,
        };

        Self {
            response_type: value("response_type"),
            client_id: value("client_id"),
            redirect_uri: value("redirect_uri"),
            scope: split_scopes(value("scope").as_deref()),
            state: value("state"),
            access_type: AccessType::parse(value("access_type").as_deref()),
            phase,
            authorize: from_body("authorize").is_some(),
            deny: from_body("deny").is_some(),
            checked: body
                .iter()
                .filter(|(_, value)| value == "on")
                .map(|(key, _)| key.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChoice {
    pub scope: String,
    pub previously_granted: bool,
}

/// Everything needed to render a consent form that resubmits correctly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentPrompt {
    pub client_id: String,
    pub client_name: String,
    pub response_type: ResponseType,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub access_type: AccessType,
    pub consent_token: String,
    pub choices: Vec<ScopeChoice>,
}

impl ConsentPrompt {
    pub fn scope(&self) -> String {
        self.choices
            .iter()
            .map(|choice| choice.scope.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A registered redirect URI kept exactly as registered, with response
/// parameters appended to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget(String);

impl RedirectTarget {
    /// Only absolute URIs qualify
    fn parse(uri: &str) -> Option<Self> {
        Url::parse(uri).ok().map(|_| Self(uri.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extend the query, ahead of any fragment
    fn with_query<'p>(self, pairs: impl IntoIterator<Item = (&'p str, &'p str)>) -> Self {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        let (base, fragment) = match self.0.split_once('#') {
            Some((base, fragment)) => (base, Some(fragment)),
            None => (self.0.as_str(), None),
        };
        let separator = match base.find('?') {
            None => "?",
            Some(_) if base.ends_with(['?', '&']) => "",
            Some(_) => "&",
        };
        let mut uri = format!("{base}{separator}{encoded}");
        if let Some(fragment) = fragment {
            uri.push('#');
            uri.push_str(fragment);
        }
        Self(uri)
    }

    /// Replace the fragment
    fn with_fragment<'p>(self, pairs: impl IntoIterator<Item = (&'p str, &'p str)>) -> Self {
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        let base = self.0.split_once('#').map_or(self.0.as_str(), |(base, _)| base);
        Self(format!("{base}#{encoded}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    LoginRequired { return_to: String },
    Prompt(ConsentPrompt),
    Redirect(RedirectTarget),
}

pub struct ConsentEngine<'a> {
    store: &'a dyn Store,
    config: &'a OAuthConfig,
    lifecycle: TokenLifecycle<'a>,
    scopes: &'a dyn ScopePolicy,
}

impl<'a> ConsentEngine<'a> {
    pub fn new(store: &'a dyn Store, config: &'a OAuthConfig, scopes: &'a dyn ScopePolicy) -> Self {
        Self {
            store,
            config,
            lifecycle: TokenLifecycle::new(store, config),
            scopes,
        }
    }

    /// Run one authorize request. `return_to` is where the login page sends
    /// an anonymous caller back to.
    pub async fn authorize(
        &self,
        params: &AuthorizeParams,
        user: Option<&User>,
        return_to: &str,
    ) -> Result<AuthorizeOutcome, AuthorizeError> {
        let response_type = ResponseType::parse(params.response_type.as_deref())
            .ok_or(AuthorizeError::BadRequest("Invalid response_type"))?;
        let Some(user) = user else {
            return Ok(AuthorizeOutcome::LoginRequired {
                return_to: return_to.to_string(),
            });
        };

        let client_id = params
            .client_id
            .as_deref()
            .ok_or(AuthorizeError::BadRequest("Missing client_id"))?;
        let client = match self.store.get_client(client_id).await {
            Ok(client) => client,
            Err(StoreError::NotFound) => return Err(AuthorizeError::BadRequest("Unknown client")),
            Err(e) => return Err(e.into()),
        };
        let redirect_uri = params
            .redirect_uri
            .as_deref()
            .filter(|uri| client.has_redirect_uri(uri))
            .and_then(RedirectTarget::parse)
            .ok_or(AuthorizeError::BadRequest("Invalid redirect uri"))?;

        let consent = match &params.phase {
            ConsentPhase::Initial => self.evaluate(params, &client, user),
            ConsentPhase::Resubmission(token_id) => {
                self.resubmitted(token_id, params, &client, user).await?
            }
        };

        match consent {
            ConsentState::Denied => {
                info!("User {} denied client {}", user.id, client.id);
                Ok(AuthorizeOutcome::Redirect(denied(
                    redirect_uri,
                    response_type,
                    params.state.as_deref(),
                )))
            }
            ConsentState::Pending(approved) => {
                let prompt = self
                    .prompt(response_type, params, &client, user, approved)
                    .await?;
                Ok(AuthorizeOutcome::Prompt(prompt))
            }
            ConsentState::Granted(scopes) => {
                let url = self
                    .finalize(response_type, redirect_uri, params, &client, user, scopes)
                    .await?;
                Ok(AuthorizeOutcome::Redirect(url))
            }
        }
    }

    fn evaluate(&self, params: &AuthorizeParams, client: &Client, user: &User) -> ConsentState {
        let approved = filter_scopes(self.scopes, &params.scope, client, Some(user));
        let consented = client.internal
            || approved
                .iter()
                .all(|scope| user.has_consent(&client.id, scope));
        if consented {
            ConsentState::Granted(approved)
        } else {
            ConsentState::Pending(approved)
        }
    }

    /// A consent token is good for one submission, by the user and for the
    /// client it was minted for.
    async fn resubmitted(
        &self,
        token_id: &str,
        params: &AuthorizeParams,
        client: &Client,
        user: &User,
    ) -> Result<ConsentState, AuthorizeError> {
        let token = match self.store.get_token(token_id).await {
            Ok(token) => token,
            Err(StoreError::NotFound) => {
                debug!("Consent token is unknown or expired");
                return Ok(ConsentState::Denied);
            }
            Err(e) => return Err(e.into()),
        };
        // Tokens of other kinds or owners are left untouched
        let matches = token.kind == TokenKind::UserConsent
            && token.user_id.as_deref() == Some(user.id.as_str())
            && token.client_id.as_deref() == Some(client.id.as_str());
        if !matches {
            return Ok(ConsentState::Denied);
        }

        let token = match self.store.consume_token(token_id).await {
            Ok(token) => token,
            Err(StoreError::NotFound) => {
                debug!("Consent token was already used");
                return Ok(ConsentState::Denied);
            }
            Err(e) => return Err(e.into()),
        };
        if params.deny || !params.authorize {
            return Ok(ConsentState::Denied);
        }

        let granted: Vec<String> = token
            .scope
            .into_iter()
            .filter(|scope| params.checked.contains(scope))
            .collect();

        let mut updated = user.clone();
        updated.consents.insert(client.id.clone(), granted.clone());
        self.store.update_user(&updated).await?;
        info!(
            "User {} granted client {} {} scopes",
            user.id,
            client.id,
            granted.len()
        );
        Ok(ConsentState::Granted(granted))
    }

    async fn prompt(
        &self,
        response_type: ResponseType,
        params: &AuthorizeParams,
        client: &Client,
        user: &User,
        approved: Vec<String>,
    ) -> Result<ConsentPrompt, AuthorizeError> {
        let choices = approved
            .iter()
            .map(|scope| ScopeChoice {
                scope: scope.clone(),
                previously_granted: user.has_consent(&client.id, scope),
            })
            .collect();
        let grantee = Grantee {
            client_id: &client.id,
            user_id: Some(&user.id),
        };
        let token = self
            .lifecycle
            .mint(
                TokenKind::UserConsent,
                grantee,
                approved,
                self.config.consent_ttl(),
            )
            .await?;

        Ok(ConsentPrompt {
            client_id: client.id.clone(),
            client_name: client.name.clone(),
            response_type,
            redirect_uri: params.redirect_uri.clone().unwrap_or_default(),
            state: params.state.clone(),
            access_type: params.access_type,
            consent_token: token.id,
            choices,
        })
    }

    async fn finalize(
        &self,
        response_type: ResponseType,
        redirect_uri: RedirectTarget,
        params: &AuthorizeParams,
        client: &Client,
        user: &User,
        scopes: Vec<String>,
    ) -> Result<RedirectTarget, AuthorizeError> {
        let grantee = Grantee {
            client_id: &client.id,
            user_id: Some(&user.id),
        };

        let target = match response_type {
            ResponseType::Token => {
                let issued = self
                    .lifecycle
                    .issue(grantee, scopes, params.access_type, None)
                    .await?;
                let response = issued.response();
                let expires_in = response.expires_in.to_string();
                let mut pairs = vec![
                    ("access_token", response.access_token.as_str()),
                    ("token_type", response.token_type.as_str()),
                    ("expires_in", expires_in.as_str()),
                    ("scope", response.scope.as_str()),
                ];
                if let Some(refresh_token) = &response.refresh_token {
                    pairs.push(("refresh_token", refresh_token.as_str()));
                }
                if let Some(state) = &params.state {
                    pairs.push(("state", state.as_str()));
                }
                redirect_uri.with_fragment(pairs)
            }
            ResponseType::Code => {
                let code = self
                    .lifecycle
                    .mint(
                        TokenKind::AuthorizationCode {
                            access_type: params.access_type,
                        },
                        grantee,
                        scopes,
                        self.config.auth_code_ttl(),
                    )
                    .await?;
                let mut pairs = vec![("code", code.id.as_str())];
                if let Some(state) = &params.state {
                    pairs.push(("state", state.as_str()));
                }
                redirect_uri.with_query(pairs)
            }
        };

        info!(
            "Authorized client {} for user {} ({})",
            client.id,
            user.id,
            response_type.as_str()
        );
        Ok(target)
    }
}

/// The error travels in the query for `code` and in the fragment for `token`
fn denied(
    redirect_uri: RedirectTarget,
    response_type: ResponseType,
    state: Option<&str>,
) -> RedirectTarget {
    let mut pairs = vec![
        ("error", "access_denied"),
        ("error_description", "The resource owner has denied the request"),
        ("error_uri", ACCESS_DENIED_URI),
    ];
    if let Some(state) = state {
        pairs.push(("state", state));
    }

    match response_type {
        ResponseType::Code => redirect_uri.with_query(pairs),
        ResponseType::Token => redirect_uri.with_fragment(pairs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::scope::AllowAllScopes;
    use heimdall_store::{ClientType, MemoryStore};
    use std::collections::HashMap;

    struct Fixture {
        store: MemoryStore,
        config: OAuthConfig,
        user: User,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = MemoryStore::new();

            let mut app = Client::new("app");
            app.name = "App".to_string();
            app.client_type = ClientType::Confidential;
            app.redirect_uris = vec![
                "https://app/cb".to_string(),
                "https://app/cb?x=1".to_string(),
                "https://app".to_string(),
            ];
            store.create_client(&app).await.unwrap();

            let mut internal = Client::new("console");
            internal.internal = true;
            internal.redirect_uris = vec!["https://console/cb".to_string()];
            store.create_client(&internal).await.unwrap();

            let mut user = User::new("u1");
            user.set_password("alice", "pw");
            store.create_user(&user).await.unwrap();

            Self {
                store,
                config: OAuthConfig::default(),
                user,
            }
        }

        fn engine(&self) -> ConsentEngine<'_> {
            ConsentEngine::new(&self.store, &self.config, &AllowAllScopes)
        }

        async fn user(&self) -> User {
            self.store.get_user("u1").await.unwrap()
        }

        async fn run(&self, query: &str, body: &str) -> Result<AuthorizeOutcome, AuthorizeError> {
            let params = AuthorizeParams::parse(Some(query), body.as_bytes());
            let user = self.user().await;
            self.engine()
                .authorize(&params, Some(&user), "/authorize")
                .await
        }
    }

    const CODE_QUERY: &str =
        "response_type=code&client_id=app&redirect_uri=https%3A%2F%2Fapp%2Fcb&scope=read%20write&state=xyz";

    fn target(outcome: AuthorizeOutcome) -> RedirectTarget {
        match outcome {
            AuthorizeOutcome::Redirect(target) => target,
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    fn redirect(outcome: AuthorizeOutcome) -> Url {
        Url::parse(target(outcome).as_str()).unwrap()
    }

    fn prompt(outcome: AuthorizeOutcome) -> ConsentPrompt {
        match outcome {
            AuthorizeOutcome::Prompt(prompt) => prompt,
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    fn query_map(url: &Url) -> HashMap<String, String> {
        url.query_pairs().into_owned().collect()
    }

    fn fragment_map(url: &Url) -> HashMap<String, String> {
        form_urlencoded::parse(url.fragment().unwrap_or_default().as_bytes())
            .into_owned()
            .collect()
    }

    #[test]
    fn test_body_values_win_and_consent_fields_come_from_body() {
        let params = AuthorizeParams::parse(
            Some("client_id=q&scope=a%20b&concent_token=ignored&authorize=Authorize"),
            b"client_id=b&a=on&b=off",
        );
        assert_eq!(params.client_id.as_deref(), Some("b"));
        assert_eq!(params.scope, vec!["a", "b"]);
        assert_eq!(params.phase, ConsentPhase::Initial);
        assert!(!params.authorize);
        assert_eq!(params.checked, HashSet::from(["a".to_string()]));

        let params = AuthorizeParams::parse(None, b"concent_token=t1&deny=Deny");
        assert_eq!(params.phase, ConsentPhase::Resubmission("t1".to_string()));
        assert!(params.deny);
        assert_eq!(params.access_type, AccessType::Online);
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let fixture = Fixture::new().await;

        let result = fixture.run("response_type=id_token&client_id=app", "").await;
        assert!(matches!(result, Err(AuthorizeError::BadRequest(_))));

        let result = fixture
            .run("response_type=code&client_id=nope&redirect_uri=https%3A%2F%2Fapp%2Fcb", "")
            .await;
        assert!(matches!(result, Err(AuthorizeError::BadRequest(_))));

        let result = fixture
            .run("response_type=code&client_id=app&redirect_uri=https%3A%2F%2Fevil%2Fcb", "")
            .await;
        assert!(matches!(result, Err(AuthorizeError::BadRequest(_))));
        assert_eq!(fixture.store.token_count(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_caller_must_log_in() {
        let fixture = Fixture::new().await;
        let params = AuthorizeParams::parse(Some(CODE_QUERY), b"");
        let outcome = fixture
            .engine()
            .authorize(&params, None, "/authorize?x=1")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            AuthorizeOutcome::LoginRequired {
                return_to: "/authorize?x=1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_internal_client_skips_consent() {
        let fixture = Fixture::new().await;
        let url = redirect(
            fixture
                .run(
                    "response_type=code&client_id=console&redirect_uri=https%3A%2F%2Fconsole%2Fcb&scope=read&state=s1",
                    "",
                )
                .await
                .unwrap(),
        );
        let query = query_map(&url);
        assert_eq!(query["state"], "s1");

        let code = fixture.store.get_token(&query["code"]).await.unwrap();
        assert_eq!(
            code.kind,
            TokenKind::AuthorizationCode {
                access_type: AccessType::Online
            }
        );
        assert_eq!(code.scope, vec!["read"]);
        assert_eq!(code.user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_consent_prompt_then_authorize() {
        let fixture = Fixture::new().await;

        let prompt = prompt(fixture.run(CODE_QUERY, "").await.unwrap());
        assert_eq!(prompt.client_name, "App");
        assert_eq!(prompt.scope(), "read write");
        assert_eq!(prompt.state.as_deref(), Some("xyz"));
        let consent = fixture.store.get_token(&prompt.consent_token).await.unwrap();
        assert_eq!(consent.kind, TokenKind::UserConsent);
        assert_eq!(consent.scope, vec!["read", "write"]);

        // Only the checked scope is granted
        let body = format!(
            "concent_token={}&read=on&authorize=Authorize",
            prompt.consent_token
        );
        let url = redirect(fixture.run(CODE_QUERY, &body).await.unwrap());
        assert_eq!(url.path(), "/cb");
        let query = query_map(&url);
        assert_eq!(query["state"], "xyz");
        let code = fixture.store.get_token(&query["code"]).await.unwrap();
        assert_eq!(code.scope, vec!["read"]);

        assert_eq!(fixture.user().await.consents["app"], vec!["read"]);
        assert!(fixture.store.get_token(&prompt.consent_token).await.is_err());
    }

    #[tokio::test]
    async fn test_prior_consent_skips_prompt() {
        let fixture = Fixture::new().await;
        let mut user = fixture.user.clone();
        user.consents
            .insert("app".to_string(), vec!["read".to_string(), "write".to_string()]);
        fixture.store.update_user(&user).await.unwrap();

        let url = redirect(fixture.run(CODE_QUERY, "").await.unwrap());
        assert!(query_map(&url).contains_key("code"));

        // A new scope prompts again, with the old ones pre-checked
        let query = CODE_QUERY.replace("read%20write", "read%20admin");
        let prompt = prompt(fixture.run(&query, "").await.unwrap());
        assert_eq!(
            prompt.choices,
            vec![
                ScopeChoice {
                    scope: "read".to_string(),
                    previously_granted: true
                },
                ScopeChoice {
                    scope: "admin".to_string(),
                    previously_granted: false
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_deny_redirects_with_error() {
        let fixture = Fixture::new().await;
        let prompt = prompt(fixture.run(CODE_QUERY, "").await.unwrap());
        let body = format!("concent_token={}&deny=Deny", prompt.consent_token);

        let url = redirect(fixture.run(CODE_QUERY, &body).await.unwrap());
        let query = query_map(&url);
        assert_eq!(query["error"], "access_denied");
        assert_eq!(query["error_uri"], ACCESS_DENIED_URI);
        assert_eq!(query["state"], "xyz");
        assert!(!query.contains_key("code"));
        assert!(fixture.user().await.consents.is_empty());
    }

    #[tokio::test]
    async fn test_implicit_deny_uses_fragment() {
        let fixture = Fixture::new().await;
        let token_query = CODE_QUERY.replace("response_type=code", "response_type=token");
        let prompt = prompt(fixture.run(&token_query, "").await.unwrap());
        let body = format!("concent_token={}&deny=Deny", prompt.consent_token);

        let url = redirect(fixture.run(&token_query, &body).await.unwrap());
        assert!(url.query().is_none());
        assert_eq!(fragment_map(&url)["error"], "access_denied");
    }

    #[tokio::test]
    async fn test_consent_token_is_single_use_and_bound() {
        let fixture = Fixture::new().await;
        let prompt = prompt(fixture.run(CODE_QUERY, "").await.unwrap());
        let body = format!(
            "concent_token={}&read=on&authorize=Authorize",
            prompt.consent_token
        );
        fixture.run(CODE_QUERY, &body).await.unwrap();

        let url = redirect(fixture.run(CODE_QUERY, &body).await.unwrap());
        assert_eq!(query_map(&url)["error"], "access_denied");

        // Another user's consent token is refused
        let mut bob = User::new("bob");
        bob.set_password("bob", "pw");
        fixture.store.create_user(&bob).await.unwrap();
        let params = AuthorizeParams::parse(Some(CODE_QUERY), b"");
        let bobs = prompt_for(&fixture, &params, &bob).await;
        let body = format!("concent_token={}&read=on&authorize=Authorize", bobs);
        let url = redirect(fixture.run(CODE_QUERY, &body).await.unwrap());
        assert_eq!(query_map(&url)["error"], "access_denied");
    }

    async fn prompt_for(fixture: &Fixture, params: &AuthorizeParams, user: &User) -> String {
        let outcome = fixture
            .engine()
            .authorize(params, Some(user), "/authorize")
            .await
            .unwrap();
        prompt(outcome).consent_token
    }

    #[tokio::test]
    async fn test_implicit_grant_returns_fragment() {
        let fixture = Fixture::new().await;
        let query = "response_type=token&client_id=console&redirect_uri=https%3A%2F%2Fconsole%2Fcb&scope=read&state=s&access_type=offline";
        let url = redirect(fixture.run(query, "").await.unwrap());
        let fragment = fragment_map(&url);

        assert_eq!(fragment["token_type"], "Bearer");
        assert_eq!(fragment["scope"], "read");
        assert_eq!(fragment["expires_in"], "3600");
        assert_eq!(fragment["state"], "s");
        let access = fixture
            .store
            .get_token(&fragment["access_token"])
            .await
            .unwrap();
        assert_eq!(access.refresh_token(), Some(fragment["refresh_token"].as_str()));
    }

    #[tokio::test]
    async fn test_code_keeps_registered_query() {
        let fixture = Fixture::new().await;
        let mut user = fixture.user.clone();
        user.consents.insert("app".to_string(), vec!["read".to_string()]);
        fixture.store.update_user(&user).await.unwrap();

        let url = redirect(
            fixture
                .run(
                    "response_type=code&client_id=app&redirect_uri=https%3A%2F%2Fapp%2Fcb%3Fx%3D1&scope=read",
                    "",
                )
                .await
                .unwrap(),
        );
        let query = query_map(&url);
        assert_eq!(query["x"], "1");
        assert!(query.contains_key("code"));
        assert!(!query.contains_key("state"));
    }

    #[test]
    fn test_redirect_target_appends_to_registered_uri() {
        let base = RedirectTarget::parse("https://app").unwrap();
        assert_eq!(
            base.clone().with_query([("code", "c1")]).as_str(),
            "https://app?code=c1"
        );
        assert_eq!(
            base.with_fragment([("access_token", "t"), ("state", "a b")]).as_str(),
            "https://app#access_token=t&state=a+b"
        );

        let with_query = RedirectTarget::parse("https://app/cb?x=1").unwrap();
        assert_eq!(
            with_query.with_query([("code", "c1")]).as_str(),
            "https://app/cb?x=1&code=c1"
        );
        let open_query = RedirectTarget::parse("https://app/cb?").unwrap();
        assert_eq!(
            open_query.with_query([("code", "c1")]).as_str(),
            "https://app/cb?code=c1"
        );
        let with_fragment = RedirectTarget::parse("https://app/cb#top").unwrap();
        assert_eq!(
            with_fragment.clone().with_query([("code", "c1")]).as_str(),
            "https://app/cb?code=c1#top"
        );
        assert_eq!(
            with_fragment.with_fragment([("error", "access_denied")]).as_str(),
            "https://app/cb#error=access_denied"
        );

        assert!(RedirectTarget::parse("/relative/cb").is_none());
    }

    #[tokio::test]
    async fn test_redirect_keeps_registered_uri_verbatim() {
        let fixture = Fixture::new().await;
        let mut user = fixture.user.clone();
        user.consents.insert("app".to_string(), vec!["read".to_string()]);
        fixture.store.update_user(&user).await.unwrap();

        let outcome = fixture
            .run(
                "response_type=code&client_id=app&redirect_uri=https%3A%2F%2Fapp&scope=read&state=s1",
                "",
            )
            .await
            .unwrap();
        let location = target(outcome);
        assert!(
            location.as_str().starts_with("https://app?code="),
            "{}",
            location.as_str()
        );
        assert!(location.as_str().ends_with("&state=s1"));
    }
}
