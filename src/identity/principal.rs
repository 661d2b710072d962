use serde::{Deserialize, Serialize};

/// Stable user principal name of the resource owner.
///
/// Built once per request from the authenticated principal and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    upn: String,
}

impl Identity {
    /// Returns `None` for blank names; an engine session cannot be bound to them.
    pub fn new(upn: impl AsRef<str>) -> Option<Self> {
        let upn = upn.as_ref().trim();
        if upn.is_empty() { return None; }
        Some(Self { upn: upn.to_string() })
    }

    pub fn upn(&self) -> &str { &self.upn }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.upn)
    }
}

/// The acting user: identity plus the inbound token the provider can exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct UserContext {
    pub identity: Identity,
    pub assertion: Option<String>,
}

impl UserContext {
    pub fn new(identity: Identity, assertion: Option<String>) -> Self {
        Self { identity, assertion: assertion.filter(|a| !a.trim().is_empty()) }
    }
}

// Keep the assertion out of logs.
impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("identity", &self.identity)
            .field("assertion", &self.assertion.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
