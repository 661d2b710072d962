use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::principal::{Identity, UserContext};
use super::provider::{TokenError, TokenProvider};
use crate::engine::AuthDelegate;

/// Token callback handed to the engine for one session.
///
/// The engine calls back from its own blocking threads, where no request context exists,
/// so the acting user is captured here at session creation. A fresh delegate is built per
/// session and never reused for another identity.
pub struct SessionAuthDelegate {
    user: UserContext,
    provider: Arc<dyn TokenProvider>,
    tenant: Option<String>,
    runtime: Handle,
}

impl SessionAuthDelegate {
    /// `runtime` drives the async provider; `acquire_token` must be called off the async
    /// worker threads (engine work runs under `spawn_blocking`).
    pub fn new(user: UserContext, provider: Arc<dyn TokenProvider>, tenant: Option<String>, runtime: Handle) -> Self {
        Self { user, provider, tenant, runtime }
    }

    pub fn identity(&self) -> &Identity { &self.user.identity }

    /// `https://aadrm.com/` -> `https://aadrm.com/.default`
    pub fn scope_for(resource: &str) -> String {
        format!("{}/.default", resource.trim().trim_end_matches('/'))
    }
}

impl AuthDelegate for SessionAuthDelegate {
    fn acquire_token(&self, identity: &Identity, authority: &str, resource: &str, claim: Option<&str>) -> Result<String, TokenError> {
        if identity != &self.user.identity {
            debug!(target: "auth", requested = %identity, acting = %self.user.identity, "engine asked for a different identity; using the session user");
        }
        let scopes = vec![Self::scope_for(resource)];
        debug!(target: "auth", user = %self.user.identity, authority, scope = %scopes[0], has_claim = claim.is_some(), "engine token request");
        let result = self.runtime.block_on(self.provider.get_token(&self.user, &scopes, self.tenant.as_deref()));
        match result {
            Ok(token) => Ok(token.token),
            Err(TokenError::ConsentRequired) => {
                warn!(target: "auth", user = %self.user.identity, scope = %scopes[0], "user consent required");
                Err(TokenError::ConsentRequired)
            }
            Err(TokenError::Failed(msg)) => Err(TokenError::Failed(msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provider::AccessToken;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedProvider {
        seen: Mutex<Vec<(String, Vec<String>)>>,
        answer: Mutex<Option<TokenError>>,
    }

    #[async_trait]
    impl TokenProvider for ScriptedProvider {
        async fn get_token(&self, user: &UserContext, scopes: &[String], _tenant: Option<&str>) -> Result<AccessToken, TokenError> {
            self.seen.lock().push((user.identity.upn().to_string(), scopes.to_vec()));
            match self.answer.lock().clone() {
                Some(e) => Err(e),
                None => Ok(AccessToken::new("tok", Duration::from_secs(60))),
            }
        }
    }

    fn user(upn: &str) -> UserContext { UserContext::new(Identity::new(upn).unwrap(), Some("assertion".into())) }

    #[test]
    fn scope_gets_default_suffix() {
        assert_eq!(SessionAuthDelegate::scope_for("https://aadrm.com/"), "https://aadrm.com/.default");
        assert_eq!(SessionAuthDelegate::scope_for("https://aadrm.com"), "https://aadrm.com/.default");
        assert_eq!(SessionAuthDelegate::scope_for("https://x.y//"), "https://x.y/.default");
    }

    #[test]
    fn uses_captured_user_not_engine_identity() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let provider = Arc::new(ScriptedProvider::default());
        let d = SessionAuthDelegate::new(user("alice@contoso.com"), provider.clone(), None, rt.handle().clone());
        let other = Identity::new("mallory@contoso.com").unwrap();
        let tok = d.acquire_token(&other, "https://login", "https://aadrm.com/", None).unwrap();
        assert_eq!(tok, "tok");
        let seen = provider.seen.lock();
        assert_eq!(seen[0].0, "alice@contoso.com");
        assert_eq!(seen[0].1, vec!["https://aadrm.com/.default".to_string()]);
    }

    #[test]
    fn consent_and_failures_propagate() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let provider = Arc::new(ScriptedProvider::default());
        let d = SessionAuthDelegate::new(user("a@b.c"), provider.clone(), None, rt.handle().clone());
        let id = Identity::new("a@b.c").unwrap();

        *provider.answer.lock() = Some(TokenError::ConsentRequired);
        assert_eq!(d.acquire_token(&id, "auth", "https://r", None).unwrap_err(), TokenError::ConsentRequired);

        *provider.answer.lock() = Some(TokenError::Failed("boom".into()));
        assert_eq!(d.acquire_token(&id, "auth", "https://r", None).unwrap_err(), TokenError::Failed("boom".into()));
        // no retry inside the delegate
        assert_eq!(provider.seen.lock().len(), 2);
    }
}
