//!
//! Engine sessions
//! ---------------
//! `Bootstrap` performs the process-wide engine runtime initialization exactly once and
//! memoizes its outcome, success or failure. `SessionManager::ensure_session` then builds a
//! fresh, user-scoped `EngineSession` for each request: consent preflight, profile load on
//! the durable cache, and an engine bound to the caller with its own auth delegate.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{error, info, warn};

use crate::engine::{
    ApplicationInfo, CacheStorage, ClassificationRuntime, Engine, EngineError, EngineSettings, Profile,
    ProfileSettings, RuntimeConfig,
};
use crate::error::ProtectError;
use crate::identity::{Identity, RequestContext, SessionAuthDelegate, TokenError, TokenProvider};
use crate::tprintln;

/// Guarded one-time runtime initializer.
///
/// The first caller runs `initialize`; concurrent callers block until it finishes and then
/// observe the same recorded result. A failure is never retried in this process.
#[derive(Default)]
pub struct Bootstrap {
    outcome: OnceCell<Result<(), String>>,
}

impl Bootstrap {
    pub fn new() -> Self { Self::default() }

    pub fn ensure(&self, runtime: &dyn ClassificationRuntime, config: &RuntimeConfig) -> Result<(), ProtectError> {
        let outcome = self.outcome.get_or_init(|| {
            info!(target: "session", app = %config.application.application_id, data = %config.data_path.display(), "bootstrapping engine runtime");
            runtime.initialize(config).map_err(|e| {
                error!(target: "session", "engine runtime bootstrap failed: {}", e);
                e.to_string()
            })
        });
        outcome.clone().map_err(ProtectError::BootstrapFailed)
    }

    /// `Some(true)` once initialized, `Some(false)` after a recorded failure, `None` before the first attempt.
    pub fn state(&self) -> Option<bool> {
        self.outcome.get().map(|r| r.is_ok())
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub application: ApplicationInfo,
    /// Root of the durable engine cache; each application gets its own subdirectory.
    pub cache_dir: PathBuf,
    /// Scope requested before any engine work to surface consent problems early.
    pub preflight_scope: Option<String>,
    pub tenant: Option<String>,
    pub locale: String,
}

impl SessionSettings {
    pub fn profile_cache_path(&self) -> PathBuf {
        let app = self.application.application_id.replace(['/', '\\', ':'], "_");
        self.cache_dir.join(app)
    }
}

/// Profile plus exactly one engine bound to one identity, owned by a single request.
///
/// Field order matters: the engine is dropped before the profile that created it.
pub struct EngineSession {
    engine: Arc<dyn Engine>,
    _profile: Arc<dyn Profile>,
    identity: Identity,
}

impl EngineSession {
    pub fn identity(&self) -> &Identity { &self.identity }

    pub fn engine(&self) -> Arc<dyn Engine> { self.engine.clone() }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("identity", &self.identity)
            .field("engine_id", &self.engine.engine_id())
            .finish()
    }
}

pub struct SessionManager {
    runtime: Arc<dyn ClassificationRuntime>,
    provider: Arc<dyn TokenProvider>,
    settings: SessionSettings,
    bootstrap: Arc<Bootstrap>,
}

fn engine_creation_error(e: EngineError) -> ProtectError {
    ProtectError::from_engine(e, ProtectError::EngineCreationFailed)
}

impl SessionManager {
    pub fn new(runtime: Arc<dyn ClassificationRuntime>, provider: Arc<dyn TokenProvider>, settings: SessionSettings) -> Self {
        Self { runtime, provider, settings, bootstrap: Arc::new(Bootstrap::new()) }
    }

    pub fn bootstrap(&self) -> &Arc<Bootstrap> { &self.bootstrap }

    /// Build a session for the calling user. Never cached; call once per request.
    pub async fn ensure_session(&self, ctx: &RequestContext) -> Result<EngineSession, ProtectError> {
        let Some(user) = ctx.user.clone() else {
            warn!(target: "session", request = ?ctx.request_id, "no identity on request");
            return Err(ProtectError::IdentityMissing);
        };

        if let Some(scope) = &self.settings.preflight_scope {
            match self.provider.get_token(&user, std::slice::from_ref(scope), self.settings.tenant.as_deref()).await {
                Ok(_) => {}
                Err(TokenError::ConsentRequired) => {
                    info!(target: "session", user = %user.identity, "consent required before session");
                    return Err(ProtectError::ConsentRequired);
                }
                Err(TokenError::Failed(msg)) => {
                    error!(target: "session", user = %user.identity, "preflight token failed: {}", msg);
                    return Err(ProtectError::TokenAcquisitionFailed(msg));
                }
            }
        }

        let runtime = self.runtime.clone();
        let provider = self.provider.clone();
        let bootstrap = self.bootstrap.clone();
        let settings = self.settings.clone();
        let handle = tokio::runtime::Handle::current();
        let task = tokio::task::spawn_blocking(move || -> Result<EngineSession, ProtectError> {
            let runtime_config = RuntimeConfig {
                application: settings.application.clone(),
                data_path: settings.cache_dir.clone(),
            };
            bootstrap.ensure(runtime.as_ref(), &runtime_config)?;

            let profile = runtime
                .load_profile(ProfileSettings {
                    application: settings.application.clone(),
                    cache_path: settings.profile_cache_path(),
                    cache_storage: CacheStorage::OnDisk,
                })
                .map_err(engine_creation_error)?;

            let identity = user.identity.clone();
            let delegate = Arc::new(SessionAuthDelegate::new(user, provider, settings.tenant.clone(), handle));
            let engine = profile
                .add_engine(EngineSettings {
                    engine_id: identity.upn().to_string(),
                    identity: identity.clone(),
                    auth_delegate: delegate,
                    client_data: String::new(),
                    locale: settings.locale.clone(),
                })
                .map_err(engine_creation_error)?;
            tprintln!("session.ensure user={} engine={}", identity, engine.engine_id());
            Ok(EngineSession { engine, _profile: profile, identity })
        });
        let session = task
            .await
            .map_err(|e| ProtectError::EngineCreationFailed(format!("session task aborted: {}", e)))??;
        info!(target: "session", user = %session.identity, "engine session ready");
        Ok(session)
    }
}
