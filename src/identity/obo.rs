//! On-behalf-of token exchange against the Microsoft identity platform.
//!
//! The inbound user token (the assertion) is traded for a token scoped to the
//! resource the engine asks for. Results are cached per user and scope set.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::principal::UserContext;
use super::provider::{AccessToken, TokenError, TokenProvider};
use super::token_cache::TokenCache;

const OBO_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// AADSTS codes that need the user back at the interactive sign-in page.
const INTERACTIVE_ERROR_CODES: &[u64] = &[50076, 50079, 50158, 65001];

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    error_codes: Vec<u64>,
    #[serde(default)]
    suberror: Option<String>,
}

impl TokenErrorResponse {
    fn needs_interaction(&self) -> bool {
        matches!(self.error.as_str(), "interaction_required" | "consent_required" | "login_required")
            || self.suberror.as_deref() == Some("consent_required")
            || self.error_codes.iter().any(|c| INTERACTIVE_ERROR_CODES.contains(c))
    }
}

pub struct OnBehalfOfProvider {
    client: reqwest::Client,
    authority: String,
    default_tenant: String,
    client_id: String,
    client_secret: String,
    cache: Arc<TokenCache>,
}

impl OnBehalfOfProvider {
    pub fn new(
        authority: &str,
        tenant: Option<&str>,
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building token endpoint client")?;
        Ok(Self {
            client,
            authority: authority.trim_end_matches('/').to_string(),
            default_tenant: tenant.unwrap_or("organizations").to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            cache,
        })
    }

    pub fn token_endpoint(&self, tenant: Option<&str>) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, tenant.unwrap_or(&self.default_tenant))
    }
}

#[async_trait]
impl TokenProvider for OnBehalfOfProvider {
    async fn get_token(&self, user: &UserContext, scopes: &[String], tenant: Option<&str>) -> Result<AccessToken, TokenError> {
        let upn = user.identity.upn();
        if let Some(hit) = self.cache.get(upn, scopes, tenant) {
            debug!(target: "auth", user = %upn, "token cache hit");
            return Ok(hit);
        }
        // Without an inbound token there is nothing to exchange; the user has to sign in again.
        let Some(assertion) = user.assertion.as_deref() else {
            return Err(TokenError::ConsentRequired);
        };
        let scope = scopes.join(" ");
        let form = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", OBO_GRANT),
            ("assertion", assertion),
            ("scope", scope.as_str()),
            ("requested_token_use", "on_behalf_of"),
        ];
        let resp = self.client
            .post(self.token_endpoint(tenant))
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Failed(format!("token endpoint unreachable: {}", e)))?;
        let status = resp.status();
        if status.is_success() {
            let body: TokenResponse = resp
                .json()
                .await
                .map_err(|e| TokenError::Failed(format!("malformed token response: {}", e)))?;
            let ttl = Duration::from_secs(body.expires_in.unwrap_or(3600));
            let token = AccessToken::new(body.access_token, ttl);
            self.cache.insert(upn, scopes, tenant, token.clone());
            return Ok(token);
        }
        let err: TokenErrorResponse = resp.json().await.unwrap_or_default();
        if err.needs_interaction() {
            warn!(target: "auth", user = %upn, error = %err.error, "token exchange needs user interaction");
            self.cache.evict_user(upn);
            return Err(TokenError::ConsentRequired);
        }
        Err(TokenError::Failed(format!("HTTP {}: {} {}", status, err.error, err.error_description)))
    }
}
