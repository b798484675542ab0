use std::sync::Arc;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use log::warn;
use serde::Serialize;
use utoipa::ToSchema;

use super::identity::Identity;
use crate::state::AppState;

/// Outcome of an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub enum DecisionStatus {
    Permit,
    Deny,
    Indeterminate,
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: DecisionStatus,
    pub message: String,
}

impl Decision {
    pub fn permit() -> Self {
        Self {
            status: DecisionStatus::Permit,
            message: String::new(),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        Self {
            status: DecisionStatus::Deny,
            message: message.into(),
        }
    }

    pub fn is_permit(&self) -> bool {
        self.status == DecisionStatus::Permit
    }
}

/// Policy hook consulted for every protected request
pub trait AuthorizationPolicy: Send + Sync {
    fn decide(&self, request: &Parts, identity: &Identity) -> Decision;
}

impl<F> AuthorizationPolicy for F
where
    F: Fn(&Parts, &Identity) -> Decision + Send + Sync,
{
    fn decide(&self, request: &Parts, identity: &Identity) -> Decision {
        self(request, identity)
    }
}

pub fn permit_all(_request: &Parts, _identity: &Identity) -> Decision {
    Decision::permit()
}

pub fn require_authenticated(_request: &Parts, identity: &Identity) -> Decision {
    if identity.is_authenticated() {
        Decision::permit()
    } else {
        Decision::deny("Authentication required")
    }
}

/// Builds the response for any decision other than Permit
pub trait NotPermittedHandler: Send + Sync {
    fn handle(&self, decision: Decision, identity: &Identity) -> Response;
}

impl<F> NotPermittedHandler for F
where
    F: Fn(Decision, &Identity) -> Response + Send + Sync,
{
    fn handle(&self, decision: Decision, identity: &Identity) -> Response {
        self(decision, identity)
    }
}

/// 403 with the decision message as body
#[derive(Debug, Clone, Copy, Default)]
pub struct Forbidden;

impl NotPermittedHandler for Forbidden {
    fn handle(&self, decision: Decision, _identity: &Identity) -> Response {
        (StatusCode::FORBIDDEN, decision.message).into_response()
    }
}

/// Wraps downstream handlers: resolves the caller, asks the policy, and only
/// lets Permit through. Install with [`protect`] via
/// `middleware::from_fn_with_state`.
#[derive(Clone)]
pub struct ProtectionGate {
    state: AppState,
    policy: Arc<dyn AuthorizationPolicy>,
    not_permitted: Arc<dyn NotPermittedHandler>,
}

impl ProtectionGate {
    pub fn new(state: AppState, policy: impl AuthorizationPolicy + 'static) -> Self {
        Self {
            state,
            policy: Arc::new(policy),
            not_permitted: Arc::new(Forbidden),
        }
    }

    pub fn on_not_permitted(mut self, handler: impl NotPermittedHandler + 'static) -> Self {
        self.not_permitted = Arc::new(handler);
        self
    }

    /// The resolved identity on Permit, otherwise the not-permitted response
    pub async fn check(&self, parts: &mut Parts) -> Result<Identity, Response> {
        let identity = match Identity::from_request_parts(parts, &self.state).await {
            Ok(identity) => identity,
            Err(never) => match never {},
        };

        let decision = self.policy.decide(parts, &identity);
        if decision.is_permit() {
            return Ok(identity);
        }

        warn!(
            "Request to {} not permitted ({:?}): {}",
            parts.uri.path(),
            decision.status,
            decision.message
        );
        Err(self.not_permitted.handle(decision, &identity))
    }
}

pub async fn protect(State(gate): State<ProtectionGate>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    match gate.check(&mut parts).await {
        Ok(_) => next.run(Request::from_parts(parts, body)).await,
        Err(response) => response,
    }
}
