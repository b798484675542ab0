use heimdall_store::{Client, User};

use super::protect::DecisionStatus;

/// Decides whether a client may be granted a scope, optionally on behalf of a user.
///
/// Anything but [`DecisionStatus::Permit`] drops the scope from the grant.
pub trait ScopePolicy: Send + Sync {
    fn check(&self, scope: &str, client: &Client, user: Option<&User>) -> DecisionStatus;
}

impl<F> ScopePolicy for F
where
    F: Fn(&str, &Client, Option<&User>) -> DecisionStatus + Send + Sync,
{
    fn check(&self, scope: &str, client: &Client, user: Option<&User>) -> DecisionStatus {
        self(scope, client, user)
    }
}

/// Grants every requested scope
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllScopes;

impl ScopePolicy for AllowAllScopes {
    fn check(&self, _scope: &str, _client: &Client, _user: Option<&User>) -> DecisionStatus {
        DecisionStatus::Permit
    }
}

/// Keep the permitted scopes in request order, without duplicates
pub fn filter_scopes(
    policy: &dyn ScopePolicy,
    requested: &[String],
    client: &Client,
    user: Option<&User>,
) -> Vec<String> {
    let mut approved: Vec<String> = Vec::with_capacity(requested.len());
    for scope in requested {
        if scope.is_empty() || approved.contains(scope) {
            continue;
        }
        if policy.check(scope, client, user) == DecisionStatus::Permit {
            approved.push(scope.clone());
        }
    }
    approved
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allow_all_keeps_order_and_drops_duplicates() {
        let client = Client::new("c");
        let approved = filter_scopes(
            &AllowAllScopes,
            &scopes(&["write", "read", "write", ""]),
            &client,
            None,
        );
        assert_eq!(approved, scopes(&["write", "read"]));
    }

    #[test]
    fn test_closure_policy_drops_denied_scopes() {
        let client = Client::new("c");
        let no_admin = |scope: &str, _: &Client, _: Option<&User>| {
            if scope == "admin" {
                DecisionStatus::Deny
            } else {
                DecisionStatus::Permit
            }
        };
        let approved = filter_scopes(&no_admin, &scopes(&["read", "admin"]), &client, None);
        assert_eq!(approved, scopes(&["read"]));
    }

    #[test]
    fn test_user_is_visible_to_policy() {
        let client = Client::new("c");
        let user = User::new("u1");
        let only_u1 = |_: &str, _: &Client, user: Option<&User>| match user {
            Some(u) if u.id == "u1" => DecisionStatus::Permit,
            _ => DecisionStatus::NotApplicable,
        };
        assert_eq!(
            filter_scopes(&only_u1, &scopes(&["read"]), &client, Some(&user)).len(),
            1
        );
        assert!(filter_scopes(&only_u1, &scopes(&["read"]), &client, None).is_empty());
    }
}
