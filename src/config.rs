//! Process configuration.
//!
//! Everything is read from `SENSILABEL_*` environment variables with defaults
//! suitable for a local run; the server binary layers command-line flags on top.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::engine::ApplicationInfo;

pub const DEFAULT_HTTP_PORT: u16 = 7880;
pub const DEFAULT_CACHE_DIR: &str = "mip_data";
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Scope requested before any engine work so consent problems surface up front.
pub const DEFAULT_SYNC_SCOPE: &str = "https://syncservice.o365syncservice.com/.default";
pub const DEFAULT_CONSENT_URL: &str = "/.auth/login/aad";
pub const DEFAULT_OUTPUT_FILE: &str = "MyAppOutput.xlsx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenProviderKind {
    /// Issues opaque local tokens; for development against the local engine.
    Dev,
    /// On-behalf-of exchange against the identity platform.
    OnBehalfOf,
}

impl TokenProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "local" => Some(TokenProviderKind::Dev),
            "obo" | "on-behalf-of" | "aad" => Some(TokenProviderKind::OnBehalfOf),
            _ => None,
        }
    }
}

/// Header names the authenticating proxy populates for each request.
#[derive(Debug, Clone)]
pub struct IdentityHeaders {
    pub principal_name: String,
    pub access_token: String,
}

impl Default for IdentityHeaders {
    fn default() -> Self {
        Self {
            principal_name: "x-ms-client-principal-name".to_string(),
            access_token: "x-ms-token-aad-access-token".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub tenant_id: Option<String>,
    pub authority: String,
    pub application_name: String,
    pub application_version: String,
    /// Durable engine cache root; profiles live under `<cache_dir>/<client_id>`.
    pub cache_dir: PathBuf,
    pub data_endpoint: Option<String>,
    /// Label policy for the local engine; the built-in policy is used when unset.
    pub label_policy_path: Option<PathBuf>,
    pub sync_scope: String,
    pub consent_url: String,
    pub output_file_name: String,
    pub token_provider: TokenProviderKind,
    /// Identity platform requests (on-behalf-of exchange).
    pub token_timeout_secs: u64,
    /// Data source requests.
    pub data_timeout_secs: u64,
    pub identity_headers: IdentityHeaders,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            client_id: "sensilabel-dev".to_string(),
            client_secret: None,
            tenant_id: None,
            authority: DEFAULT_AUTHORITY.to_string(),
            application_name: "sensilabel".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            data_endpoint: None,
            label_policy_path: None,
            sync_scope: DEFAULT_SYNC_SCOPE.to_string(),
            consent_url: DEFAULT_CONSENT_URL.to_string(),
            output_file_name: DEFAULT_OUTPUT_FILE.to_string(),
            token_provider: TokenProviderKind::Dev,
            token_timeout_secs: 30,
            data_timeout_secs: 15,
            identity_headers: IdentityHeaders::default(),
        }
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = AppConfig::default();
        if let Some(v) = env_nonempty("SENSILABEL_HTTP_PORT") {
            cfg.http_port = v.parse().map_err(|_| anyhow!("SENSILABEL_HTTP_PORT is not a port: {}", v))?;
        }
        if let Some(v) = env_nonempty("SENSILABEL_CLIENT_ID") { cfg.client_id = v; }
        cfg.client_secret = env_nonempty("SENSILABEL_CLIENT_SECRET");
        cfg.tenant_id = env_nonempty("SENSILABEL_TENANT_ID");
        if let Some(v) = env_nonempty("SENSILABEL_AUTHORITY") { cfg.authority = v; }
        if let Some(v) = env_nonempty("SENSILABEL_APP_NAME") { cfg.application_name = v; }
        if let Some(v) = env_nonempty("SENSILABEL_APP_VERSION") { cfg.application_version = v; }
        if let Some(v) = env_nonempty("SENSILABEL_CACHE_DIR") { cfg.cache_dir = PathBuf::from(v); }
        cfg.data_endpoint = env_nonempty("SENSILABEL_DATA_ENDPOINT");
        cfg.label_policy_path = env_nonempty("SENSILABEL_LABEL_POLICY").map(PathBuf::from);
        if let Some(v) = env_nonempty("SENSILABEL_SYNC_SCOPE") { cfg.sync_scope = v; }
        if let Some(v) = env_nonempty("SENSILABEL_CONSENT_URL") { cfg.consent_url = v; }
        if let Some(v) = env_nonempty("SENSILABEL_OUTPUT_FILE") { cfg.output_file_name = v; }
        if let Some(v) = env_nonempty("SENSILABEL_TOKEN_PROVIDER") {
            cfg.token_provider = TokenProviderKind::parse(&v)
                .ok_or_else(|| anyhow!("unknown SENSILABEL_TOKEN_PROVIDER '{}' (expected dev|obo)", v))?;
        }
        if let Some(v) = env_nonempty("SENSILABEL_TOKEN_TIMEOUT_SECS") {
            cfg.token_timeout_secs = v.parse().map_err(|_| anyhow!("SENSILABEL_TOKEN_TIMEOUT_SECS is not a number: {}", v))?;
        }
        if let Some(v) = env_nonempty("SENSILABEL_DATA_TIMEOUT_SECS") {
            cfg.data_timeout_secs = v.parse().map_err(|_| anyhow!("SENSILABEL_DATA_TIMEOUT_SECS is not a number: {}", v))?;
        }
        if let Some(v) = env_nonempty("SENSILABEL_PRINCIPAL_HEADER") { cfg.identity_headers.principal_name = v.to_ascii_lowercase(); }
        if let Some(v) = env_nonempty("SENSILABEL_TOKEN_HEADER") { cfg.identity_headers.access_token = v.to_ascii_lowercase(); }
        Ok(cfg)
    }

    pub fn application_info(&self) -> ApplicationInfo {
        ApplicationInfo {
            application_id: self.client_id.clone(),
            application_name: self.application_name.clone(),
            application_version: self.application_version.clone(),
        }
    }

    /// Fail early on combinations that can only break at request time.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("client id must not be empty"));
        }
        if self.token_provider == TokenProviderKind::OnBehalfOf && self.client_secret.is_none() {
            return Err(anyhow!("the on-behalf-of token provider needs SENSILABEL_CLIENT_SECRET"));
        }
        if self.token_timeout_secs == 0 || self.data_timeout_secs == 0 {
            return Err(anyhow!("request timeouts must be at least one second"));
        }
        if self.output_file_name.contains('"') || self.output_file_name.contains('/') {
            return Err(anyhow!("output file name must be a bare file name: {}", self.output_file_name));
        }
        Ok(())
    }
}
