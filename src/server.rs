//!
//! sensilabel HTTP server
//! ----------------------
//! This module defines the Axum-based HTTP front end for labelled document downloads.
//!
//! Responsibilities:
//! - Identity from the authenticating proxy headers, one engine session per request.
//! - Consent preflight with a redirect to the interactive sign-in challenge.
//! - Label selection form with an antiforgery token keyed by identity.
//! - Workbook assembly, labelling and protection, then the download.
//! - Every failure after the session exists re-lists labels and re-renders the form.

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use getrandom::getrandom;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::{AppConfig, TokenProviderKind};
use crate::datasource::{DataSource, DataTable};
use crate::engine::local::LocalRuntime;
use crate::engine::{ClassificationRuntime, HandlerSource};
use crate::error::{AppError, ProtectError};
use crate::identity::{DevTokenProvider, Identity, OnBehalfOfProvider, RequestContext, TokenCache, TokenProvider};
use crate::labels::{list_labels, Label};
use crate::protection::{protect_document_async, DocumentRequest, ProtectionRequest};
use crate::session::{EngineSession, SessionManager, SessionSettings};
use crate::workbook::{build_workbook, XLSX_CONTENT_TYPE};

pub mod page;

use page::FormView;

const DOCUMENT_PATH: &str = "/document";
const MSG_SELECT_LABEL: &str = "Please select a label.";
const MSG_ADDITIONAL_INFO: &str = "Additional Info Required for the selected Label.";
const MSG_GENERIC: &str = "An error occurred during download.";
const MSG_DATA_UNAVAILABLE: &str = "Data is currently unavailable.";

static RECIPIENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^@\s,;<>"]+@[^@\s,;<>"]+\.[^@\s,;<>".]+$"#).expect("static regex"));

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
    pub data_source: Arc<DataSource>,
    pub config: Arc<AppConfig>,
    /// Lowercased UPN -> antiforgery token
    pub csrf_tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl AppState {
    pub fn new(config: AppConfig, runtime: Arc<dyn ClassificationRuntime>, provider: Arc<dyn TokenProvider>) -> anyhow::Result<Self> {
        let settings = SessionSettings {
            application: config.application_info(),
            cache_dir: config.cache_dir.clone(),
            preflight_scope: Some(config.sync_scope.clone()),
            tenant: config.tenant_id.clone(),
            locale: "en-US".to_string(),
        };
        let data_source = DataSource::new(config.data_endpoint.clone(), Duration::from_secs(config.data_timeout_secs))?;
        Ok(Self {
            sessions: Arc::new(SessionManager::new(runtime, provider, settings)),
            data_source: Arc::new(data_source),
            config: Arc::new(config),
            csrf_tokens: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

pub fn build_token_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn TokenProvider>> {
    Ok(match config.token_provider {
        TokenProviderKind::Dev => Arc::new(DevTokenProvider::new()),
        TokenProviderKind::OnBehalfOf => {
            let secret = config.client_secret.as_deref().context("on-behalf-of provider needs a client secret")?;
            Arc::new(OnBehalfOfProvider::new(
                &config.authority,
                config.tenant_id.as_deref(),
                &config.client_id,
                secret,
                Duration::from_secs(config.token_timeout_secs),
                Arc::new(TokenCache::default()),
            )?)
        }
    })
}

fn log_startup_folders(config: &AppConfig) {
    let cwd = std::env::current_dir().ok();
    let exe = std::env::current_exe().ok();
    let cache_env = std::env::var("SENSILABEL_CACHE_DIR").ok();
    info!(
        target: "startup",
        "sensilabel starting. Folder configuration: cwd={:?}, exe={:?}, cache_dir_param={:?}, SENSILABEL_CACHE_DIR_env={:?}, label_policy={:?}",
        cwd, exe, config.cache_dir, cache_env, config.label_policy_path
    );
    info!(
        target: "startup",
        "Path existence: cache_dir_exists={}, data_endpoint={:?}, token_provider={:?}",
        config.cache_dir.exists(), config.data_endpoint, config.token_provider
    );
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "sensilabel ok" }))
        .route(DOCUMENT_PATH, get(document_form))
        .route("/document/protect", post(protect_download))
        .with_state(state)
}

/// Start the HTTP server with the local engine runtime and the configured token provider.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    config.validate()?;
    log_startup_folders(&config);
    std::fs::create_dir_all(&config.cache_dir)
        .with_context(|| format!("Failed to create or access engine cache: {}", config.cache_dir.display()))?;

    let provider = build_token_provider(&config)?;
    let runtime: Arc<dyn ClassificationRuntime> = Arc::new(LocalRuntime::from_policy_path(config.label_policy_path.as_deref()));
    let port = config.http_port;
    let app = build_router(AppState::new(config, runtime, provider)?);

    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProtectForm {
    #[serde(rename = "labelId", default)]
    label_id: String,
    #[serde(default)]
    recipients: String,
    #[serde(rename = "rightsTier", default)]
    rights_tier: Option<String>,
    #[serde(default)]
    justification: Option<String>,
    #[serde(rename = "csrfToken", default)]
    csrf_token: String,
}

fn token_from(fill: impl FnOnce(&mut [u8]) -> Result<(), getrandom::Error>) -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; 32];
    fill(&mut bytes)?;
    let mut token = String::with_capacity(64);
    use std::fmt::Write as _;
    for b in &bytes { let _ = write!(&mut token, "{:02x}", b); }
    Ok(token)
}

fn new_token() -> Result<String, getrandom::Error> {
    token_from(getrandom)
}

/// One token per user, reused across page loads so several open forms stay valid.
async fn issue_csrf(state: &AppState, identity: &Identity) -> Result<String, AppError> {
    let key = identity.upn().to_ascii_lowercase();
    let mut map = state.csrf_tokens.write().await;
    if let Some(existing) = map.get(&key) {
        return Ok(existing.clone());
    }
    let token = new_token().map_err(|e| {
        error!(target: "http", "antiforgery token generation failed: {}", e);
        AppError::internal("csrf_unavailable", "The form could not be prepared. Try again later.")
    })?;
    map.insert(key, token.clone());
    Ok(token)
}

async fn forget_csrf(state: &AppState, identity: &Identity) {
    state.csrf_tokens.write().await.remove(&identity.upn().to_ascii_lowercase());
}

async fn validate_csrf(state: &AppState, identity: &Identity, provided: &str) -> bool {
    if provided.is_empty() { return false; }
    let map = state.csrf_tokens.read().await;
    map.get(&identity.upn().to_ascii_lowercase()).map(|t| t == provided).unwrap_or(false)
}

fn consent_redirect(config: &AppConfig) -> Response {
    let sep = if config.consent_url.contains('?') { '&' } else { '?' };
    let location = format!("{}{}post_login_redirect_uri={}", config.consent_url, sep, urlencoding::encode(DOCUMENT_PATH));
    match HeaderValue::from_str(&location) {
        Ok(v) => (StatusCode::FOUND, [(header::LOCATION, v)]).into_response(),
        Err(_) => error_response(AppError::internal("bad_consent_url", "Sign-in is misconfigured.")),
    }
}

fn error_response(err: AppError) -> Response {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Html(page::render_error(status.as_u16(), err.message()))).into_response()
}

/// Errors raised before a form can be shown. The user's antiforgery token is dropped;
/// the next successful page load issues a fresh one.
async fn session_failure(state: &AppState, identity: Option<&Identity>, err: ProtectError) -> Response {
    if let Some(identity) = identity {
        forget_csrf(state, identity).await;
    }
    match err {
        ProtectError::ConsentRequired => consent_redirect(&state.config),
        other => {
            error!(target: "http", "session setup failed: {}", other);
            error_response(other.into())
        }
    }
}

fn validate_recipients(recipients: &[String]) -> Result<(), String> {
    match recipients.iter().find(|r| !RECIPIENT_RE.is_match(r)) {
        Some(bad) => Err(format!("'{}' is not a valid email address.", bad)),
        None => Ok(()),
    }
}

async fn load_data(state: &AppState) -> (DataTable, Option<String>) {
    match state.data_source.fetch().await {
        Ok(t) => (t, None),
        Err(e) => {
            error!(target: "http", "data source fetch failed: {:#}", e);
            (DataTable::default(), Some(MSG_DATA_UNAVAILABLE.to_string()))
        }
    }
}

/// Fresh label listing for a re-rendered form; falls back to the earlier listing.
async fn relist(session: &EngineSession, previous: Vec<Label>) -> Vec<Label> {
    match list_labels(session).await {
        Ok(labels) => labels,
        Err(e) => {
            warn!(target: "http", "label re-listing failed: {}", e);
            previous
        }
    }
}

async fn document_form(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = RequestContext::from_headers(&headers, &state.config.identity_headers);
    let identity = ctx.user.as_ref().map(|u| &u.identity);
    let session = match state.sessions.ensure_session(&ctx).await {
        Ok(s) => s,
        Err(e) => return session_failure(&state, identity, e).await,
    };
    let labels = match list_labels(&session).await {
        Ok(l) => l,
        Err(e) => return session_failure(&state, identity, e).await,
    };
    let (data, message) = load_data(&state).await;
    let csrf_token = match issue_csrf(&state, session.identity()).await {
        Ok(t) => t,
        Err(e) => return error_response(e),
    };
    let view = FormView {
        user: session.identity().upn().to_string(),
        labels,
        data,
        csrf_token,
        rights_tier: "View".to_string(),
        message,
        ..Default::default()
    };
    Html(page::render_form(&view)).into_response()
}

async fn protect_download(State(state): State<AppState>, headers: HeaderMap, Form(form): Form<ProtectForm>) -> Response {
    let ctx = RequestContext::from_headers(&headers, &state.config.identity_headers);
    let Some(identity) = ctx.user.as_ref().map(|u| u.identity.clone()) else {
        return error_response(ProtectError::IdentityMissing.into());
    };
    if !validate_csrf(&state, &identity, &form.csrf_token).await {
        warn!(target: "http", user = %identity, "antiforgery token rejected");
        return error_response(AppError::csrf("invalid_csrf", "The form has expired. Reload the page and try again."));
    }

    let session = match state.sessions.ensure_session(&ctx).await {
        Ok(s) => s,
        Err(e) => return session_failure(&state, Some(&identity), e).await,
    };
    let labels = match list_labels(&session).await {
        Ok(l) => l,
        Err(e) => return session_failure(&state, Some(&identity), e).await,
    };
    let (data, data_message) = load_data(&state).await;
    let protection = ProtectionRequest::from_form(&form.recipients, form.rights_tier.as_deref());

    let mut view = FormView {
        user: identity.upn().to_string(),
        labels,
        data: data.clone(),
        csrf_token: form.csrf_token.clone(),
        selected_label: form.label_id.trim().to_string(),
        recipients: form.recipients.clone(),
        rights_tier: protection.rights_tier.clone(),
        justification: form.justification.clone().unwrap_or_default(),
        requires_additional_info: false,
        message: None,
    };
    let rerender = |view: FormView| Html(page::render_form(&view)).into_response();

    if view.selected_label.is_empty() {
        view.message = Some(MSG_SELECT_LABEL.to_string());
        return rerender(view);
    }
    if let Err(msg) = validate_recipients(&protection.recipients) {
        view.message = Some(msg);
        return rerender(view);
    }
    if let Some(msg) = data_message {
        view.message = Some(msg);
        return rerender(view);
    }

    let content = match tokio::task::spawn_blocking(move || build_workbook(&data)).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            error!(target: "http", "workbook build failed: {:#}", e);
            view.message = Some(MSG_GENERIC.to_string());
            return rerender(view);
        }
        Err(e) => {
            error!(target: "http", "workbook task aborted: {}", e);
            view.message = Some(MSG_GENERIC.to_string());
            return rerender(view);
        }
    };

    let file_name = state.config.output_file_name.clone();
    let request = DocumentRequest {
        content: HandlerSource::Bytes(content),
        file_name: file_name.clone(),
        label_id: view.selected_label.clone(),
        justification: form.justification.clone(),
        protection,
    };
    let result = protect_document_async(&session, request).await;
    match result {
        Ok(outcome) if outcome.success => match outcome.bytes {
            Some(bytes) => {
                info!(target: "http", user = %identity, label = %view.selected_label, bytes = bytes.len(), "protected document served");
                download_response(&file_name, bytes)
            }
            None => {
                error!(target: "http", "successful outcome carried no bytes");
                view.message = Some(MSG_GENERIC.to_string());
                view.labels = relist(&session, view.labels).await;
                rerender(view)
            }
        },
        Ok(outcome) if outcome.requires_additional_info => {
            view.requires_additional_info = true;
            view.message = Some(MSG_ADDITIONAL_INFO.to_string());
            view.labels = relist(&session, view.labels).await;
            rerender(view)
        }
        Ok(_) => {
            warn!(target: "http", user = %identity, "engine produced no output");
            view.message = Some(MSG_GENERIC.to_string());
            view.labels = relist(&session, view.labels).await;
            rerender(view)
        }
        Err(ProtectError::ConsentRequired) => consent_redirect(&state.config),
        Err(e) => {
            error!(target: "http", user = %identity, "document protection failed: {}", e);
            let app: AppError = e.into();
            view.message = Some(app.message().to_string());
            view.labels = relist(&session, view.labels).await;
            rerender(view)
        }
    }
}

fn download_response(file_name: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", file_name);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE));
    match HeaderValue::from_str(&disposition) {
        Ok(v) => { headers.insert(header::CONTENT_DISPOSITION, v); }
        Err(_) => return error_response(AppError::internal("bad_file_name", MSG_GENERIC)),
    }
    (StatusCode::OK, headers, bytes).into_response()
}
