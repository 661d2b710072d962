//! In-process engine for development and tests.
//!
//! Honors the engine contract end to end: it must be initialized before profiles load,
//! it keeps a durable profile cache on disk, it asks the auth delegate for tokens when
//! syncing policy and when applying protection, and it enforces per-label rules
//! (justification, user-defined protection). Output is a framed container; it carries
//! the label and rights metadata but is not a security boundary.

mod handler;
mod policy;

pub use handler::{read_container, AppliedLabel, ContainerHeader, LocalHandler, CONTAINER_MAGIC};
pub use policy::{LabelPolicy, PolicyLabel};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{
    AuthDelegate, CacheStorage, ClassificationRuntime, Engine, EngineError, EngineLabel, EngineSettings,
    FileHandler, HandlerSource, Profile, ProfileSettings, RuntimeConfig,
};
use crate::identity::Identity;

pub const AUTHORITY: &str = "https://login.microsoftonline.com/common";
pub const POLICY_RESOURCE: &str = "https://syncservice.o365syncservice.com/";
pub const PROTECTION_RESOURCE: &str = "https://aadrm.com/";

#[derive(Debug, Clone)]
pub enum PolicySource {
    Builtin,
    File(PathBuf),
    Inline(LabelPolicy),
}

pub struct LocalRuntime {
    source: PolicySource,
    policy: RwLock<Option<Arc<LabelPolicy>>>,
}

impl LocalRuntime {
    pub fn new(source: PolicySource) -> Self {
        Self { source, policy: RwLock::new(None) }
    }

    pub fn from_policy_path(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::new(PolicySource::File(p.to_path_buf())),
            None => Self::new(PolicySource::Builtin),
        }
    }
}

fn file_safe(id: &str) -> String {
    id.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' }).collect()
}

impl ClassificationRuntime for LocalRuntime {
    fn initialize(&self, config: &RuntimeConfig) -> Result<(), EngineError> {
        std::fs::create_dir_all(&config.data_path)
            .map_err(|e| EngineError::Runtime(format!("cannot create {}: {}", config.data_path.display(), e)))?;
        let policy = match &self.source {
            PolicySource::Builtin => LabelPolicy::builtin(),
            PolicySource::File(path) => LabelPolicy::load(path).map_err(|e| EngineError::Runtime(e.to_string()))?,
            PolicySource::Inline(p) => p.clone(),
        };
        info!(target: "engine", app = %config.application.application_id, labels = policy.labels.len(), "local runtime initialized");
        *self.policy.write() = Some(Arc::new(policy));
        Ok(())
    }

    fn load_profile(&self, settings: ProfileSettings) -> Result<Arc<dyn Profile>, EngineError> {
        let Some(policy) = self.policy.read().clone() else {
            return Err(EngineError::Runtime("runtime not initialized".into()));
        };
        let cache_path = match settings.cache_storage {
            CacheStorage::OnDisk => {
                std::fs::create_dir_all(settings.cache_path.join("engines"))?;
                let profile = serde_json::json!({
                    "application": settings.application,
                    "loaded_at": Utc::now().to_rfc3339(),
                });
                std::fs::write(settings.cache_path.join("profile.json"), profile.to_string())?;
                Some(settings.cache_path)
            }
            CacheStorage::InMemory => None,
        };
        Ok(Arc::new(LocalProfile { policy, cache_path }))
    }
}

pub struct LocalProfile {
    policy: Arc<LabelPolicy>,
    cache_path: Option<PathBuf>,
}

impl Profile for LocalProfile {
    fn add_engine(&self, settings: EngineSettings) -> Result<Arc<dyn Engine>, EngineError> {
        // Policy sync is authenticated as the engine identity.
        settings.auth_delegate.acquire_token(&settings.identity, AUTHORITY, POLICY_RESOURCE, None)?;
        if let Some(dir) = &self.cache_path {
            let state = serde_json::json!({
                "engine_id": settings.engine_id,
                "locale": settings.locale,
                "client_data": settings.client_data,
                "labels": self.policy.labels.len(),
                "synced_at": Utc::now().to_rfc3339(),
            });
            std::fs::write(dir.join("engines").join(format!("{}.json", file_safe(&settings.engine_id))), state.to_string())?;
        }
        debug!(target: "engine", engine = %settings.engine_id, "engine added");
        Ok(Arc::new(LocalEngine {
            engine_id: settings.engine_id,
            identity: settings.identity,
            delegate: settings.auth_delegate,
            policy: self.policy.clone(),
            audit_log: self.cache_path.as_ref().map(|d| d.join("audit.log")),
        }))
    }
}

pub struct LocalEngine {
    engine_id: String,
    identity: Identity,
    delegate: Arc<dyn AuthDelegate>,
    policy: Arc<LabelPolicy>,
    audit_log: Option<PathBuf>,
}

impl Engine for LocalEngine {
    fn engine_id(&self) -> &str { &self.engine_id }

    fn sensitivity_labels(&self) -> Result<Vec<EngineLabel>, EngineError> {
        Ok(self.policy.engine_labels())
    }

    fn label_by_id(&self, id: &str) -> Result<Option<EngineLabel>, EngineError> {
        let mut stack: Vec<EngineLabel> = self.policy.engine_labels();
        while let Some(l) = stack.pop() {
            if l.id == id { return Ok(Some(l)); }
            stack.extend(l.children);
        }
        Ok(None)
    }

    fn create_handler(&self, source: HandlerSource, content_identifier: &str, audit_discovery: bool) -> Result<Box<dyn FileHandler>, EngineError> {
        let bytes = match source {
            HandlerSource::Bytes(b) => b,
            HandlerSource::Path(p) => std::fs::read(&p)
                .map_err(|e| EngineError::UnsupportedContent(format!("cannot read {}: {}", p.display(), e)))?,
        };
        let audit = if audit_discovery { self.audit_log.clone() } else { None };
        let handler = LocalHandler::open(bytes, content_identifier, self.identity.clone(), self.delegate.clone(), self.policy.clone(), audit)?;
        Ok(Box::new(handler))
    }
}
