use std::collections::HashSet;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::principal::UserContext;
use crate::tprintln;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// An interactive step (sign-in, MFA, consent) is needed before a token can be issued.
    #[error("interactive consent required")]
    ConsentRequired,
    #[error("token acquisition failed: {0}")]
    Failed(String),
}

#[derive(Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, ttl: Duration) -> Self {
        Self { token: token.into(), expires_at: Instant::now() + ttl }
    }

    pub fn is_valid_for(&self, skew: Duration) -> bool {
        self.expires_at > Instant::now() + skew
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken").field("expires_at", &self.expires_at).finish_non_exhaustive()
    }
}

/// Exchanges the acting user's session for an access token scoped to a resource.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(&self, user: &UserContext, scopes: &[String], tenant: Option<&str>) -> Result<AccessToken, TokenError>;
}

/// Development provider: hands out opaque local tokens without any network round trip.
///
/// Users listed via `require_consent` get `ConsentRequired` until `grant_consent` is called,
/// which lets the consent redirect path be exercised locally. `require_consent_for_scope`
/// limits the gate to one scope.
pub struct DevTokenProvider {
    ttl: Duration,
    pending_consent: RwLock<HashSet<String>>,
    pending_scoped: RwLock<HashSet<(String, String)>>,
}

impl Default for DevTokenProvider {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60 * 60),
            pending_consent: RwLock::new(HashSet::new()),
            pending_scoped: RwLock::new(HashSet::new()),
        }
    }
}

impl DevTokenProvider {
    pub fn new() -> Self { Self::default() }

    pub fn require_consent(&self, upn: &str) {
        self.pending_consent.write().insert(upn.to_ascii_lowercase());
    }

    pub fn require_consent_for_scope(&self, upn: &str, scope: &str) {
        self.pending_scoped.write().insert((upn.to_ascii_lowercase(), scope.to_string()));
    }

    /// Clears every pending consent for `upn`; true if any was pending.
    pub fn grant_consent(&self, upn: &str) -> bool {
        let upn = upn.to_ascii_lowercase();
        let all = self.pending_consent.write().remove(&upn);
        let mut scoped = self.pending_scoped.write();
        let before = scoped.len();
        scoped.retain(|(u, _)| u != &upn);
        all || scoped.len() != before
    }

    fn needs_consent(&self, upn: &str, scopes: &[String]) -> bool {
        let upn = upn.to_ascii_lowercase();
        if self.pending_consent.read().contains(&upn) {
            return true;
        }
        let scoped = self.pending_scoped.read();
        scopes.iter().any(|s| scoped.contains(&(upn.clone(), s.clone())))
    }
}

#[async_trait]
impl TokenProvider for DevTokenProvider {
    async fn get_token(&self, user: &UserContext, scopes: &[String], _tenant: Option<&str>) -> Result<AccessToken, TokenError> {
        if scopes.is_empty() {
            return Err(TokenError::Failed("no scopes requested".into()));
        }
        if self.needs_consent(user.identity.upn(), scopes) {
            tprintln!("dev_token.consent_required user={}", user.identity);
            return Err(TokenError::ConsentRequired);
        }
        let token = format!("dev.{}.{}", user.identity.upn(), uuid::Uuid::new_v4().simple());
        Ok(AccessToken::new(token, self.ttl))
    }
}
