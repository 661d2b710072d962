use axum::http::HeaderMap;

use super::{Identity, UserContext};
use crate::config::IdentityHeaders;

/// Per-request view of who is calling, captured once from the trusted proxy headers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: Option<UserContext>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn for_user(user: UserContext) -> Self {
        Self { user: Some(user), request_id: None }
    }

    /// The principal header names the user; the assertion comes from the proxy token
    /// header, or from an `Authorization: Bearer` header when the proxy does not inject one.
    pub fn from_headers(headers: &HeaderMap, names: &IdentityHeaders) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.trim().to_string());
        let identity = header(&names.principal_name).and_then(Identity::new);
        let assertion = header(&names.access_token).filter(|s| !s.is_empty()).or_else(|| {
            header("authorization").and_then(|v| {
                let (scheme, token) = v.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim().to_string())
            })
        });
        let request_id = header("x-request-id");
        Self { user: identity.map(|id| UserContext::new(id, assertion)), request_id }
    }
}
