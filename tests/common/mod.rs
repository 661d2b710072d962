//! Shared fakes for integration tests: a recording engine stack and a scripted token provider.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use sensilabel::engine::{
    ClassificationRuntime, Engine, EngineError, EngineLabel, EngineSettings, FileHandler, HandlerSource,
    LabelingOptions, Profile, ProfileSettings, ProtectionDescriptor, RuntimeConfig,
};
use sensilabel::identity::{AccessToken, TokenError, TokenProvider, UserContext};

pub const SYNC_RESOURCE: &str = "https://syncservice.o365syncservice.com/";

pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn label(id: &str, sensitivity: i32, children: Vec<EngineLabel>) -> EngineLabel {
    EngineLabel { id: id.into(), name: format!("Label {}", id), description: String::new(), sensitivity, children }
}

/// Knobs for the recording engine.
#[derive(Clone, Default)]
pub struct Behavior {
    pub labels: Vec<EngineLabel>,
    pub fail_initialize: bool,
    pub fail_add_engine: Option<EngineError>,
    pub fail_create_handler: bool,
    pub refuse_label: Option<EngineError>,
    pub decline_commit: bool,
    pub fail_commit: bool,
    /// Label listing fails as if the engine's token callback needed consent.
    pub consent_on_labels: bool,
    /// Setting protection fails as if the rights service needed consent.
    pub consent_on_protection: bool,
    /// The engine thread dies while opening the document.
    pub panic_on_create_handler: bool,
}

impl Behavior {
    pub fn with_labels() -> Self {
        Self {
            labels: vec![label("public", 0, vec![]), label("conf", 2, vec![label("conf-all", 2, vec![]), label("conf-adhoc", 1, vec![])])],
            ..Default::default()
        }
    }
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub trace: Trace,
    pub descriptors: Arc<Mutex<Vec<ProtectionDescriptor>>>,
    pub options: Arc<Mutex<Vec<LabelingOptions>>>,
}

impl Recorder {
    pub fn ops(&self) -> Vec<String> { self.trace.lock().clone() }

    pub fn count(&self, op: &str) -> usize { self.trace.lock().iter().filter(|o| o.as_str() == op).count() }

    pub fn position(&self, op: &str) -> Option<usize> { self.trace.lock().iter().position(|o| o == op) }

    fn push(&self, op: impl Into<String>) { self.trace.lock().push(op.into()); }
}

pub struct RecordingRuntime {
    pub rec: Recorder,
    pub behavior: Behavior,
}

impl RecordingRuntime {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self { rec: Recorder::default(), behavior })
    }
}

impl ClassificationRuntime for RecordingRuntime {
    fn initialize(&self, _config: &RuntimeConfig) -> Result<(), EngineError> {
        self.rec.push("initialize");
        if self.behavior.fail_initialize { Err(EngineError::Runtime("native library missing".into())) } else { Ok(()) }
    }

    fn load_profile(&self, _settings: ProfileSettings) -> Result<Arc<dyn Profile>, EngineError> {
        self.rec.push("load_profile");
        Ok(Arc::new(RecordingProfile { rec: self.rec.clone(), behavior: self.behavior.clone() }))
    }
}

struct RecordingProfile {
    rec: Recorder,
    behavior: Behavior,
}

impl Profile for RecordingProfile {
    fn add_engine(&self, settings: EngineSettings) -> Result<Arc<dyn Engine>, EngineError> {
        self.rec.push("add_engine");
        settings.auth_delegate.acquire_token(&settings.identity, "https://login.microsoftonline.com/common", SYNC_RESOURCE, None)?;
        if let Some(e) = &self.behavior.fail_add_engine {
            return Err(e.clone());
        }
        Ok(RecordingEngine::new(&settings.engine_id, self.rec.clone(), self.behavior.clone()))
    }
}

pub struct RecordingEngine {
    id: String,
    pub rec: Recorder,
    behavior: Behavior,
}

impl RecordingEngine {
    pub fn new(id: &str, rec: Recorder, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self { id: id.to_string(), rec, behavior })
    }
}

fn find(labels: &[EngineLabel], id: &str) -> Option<EngineLabel> {
    for l in labels {
        if l.id == id { return Some(l.clone()); }
        if let Some(c) = find(&l.children, id) { return Some(c); }
    }
    None
}

impl Engine for RecordingEngine {
    fn engine_id(&self) -> &str { &self.id }

    fn sensitivity_labels(&self) -> Result<Vec<EngineLabel>, EngineError> {
        self.rec.push("list_labels");
        if self.behavior.consent_on_labels {
            return Err(EngineError::Auth(TokenError::ConsentRequired));
        }
        Ok(self.behavior.labels.clone())
    }

    fn label_by_id(&self, id: &str) -> Result<Option<EngineLabel>, EngineError> {
        self.rec.push("label_by_id");
        Ok(find(&self.behavior.labels, id))
    }

    fn create_handler(&self, source: HandlerSource, content_identifier: &str, _audit_discovery: bool) -> Result<Box<dyn FileHandler>, EngineError> {
        self.rec.push("create_handler");
        if self.behavior.panic_on_create_handler {
            panic!("engine thread crashed opening {}", content_identifier);
        }
        if self.behavior.fail_create_handler {
            return Err(EngineError::UnsupportedContent(content_identifier.to_string()));
        }
        let payload = match source {
            HandlerSource::Bytes(b) => b,
            HandlerSource::Path(p) => std::fs::read(p)?,
        };
        Ok(Box::new(RecordingHandler { rec: self.rec.clone(), behavior: self.behavior.clone(), payload, committed: false }))
    }
}

struct RecordingHandler {
    rec: Recorder,
    behavior: Behavior,
    payload: Vec<u8>,
    committed: bool,
}

impl FileHandler for RecordingHandler {
    fn set_protection(&mut self, descriptor: &ProtectionDescriptor) -> Result<(), EngineError> {
        self.rec.push("set_protection");
        if self.behavior.consent_on_protection {
            return Err(EngineError::Auth(TokenError::ConsentRequired));
        }
        self.rec.descriptors.lock().push(descriptor.clone());
        Ok(())
    }

    fn set_label(&mut self, _label: &EngineLabel, options: &LabelingOptions) -> Result<(), EngineError> {
        self.rec.push("set_label");
        self.rec.options.lock().push(options.clone());
        match &self.behavior.refuse_label {
            Some(e) if options.justification_message.is_empty() => Err(e.clone()),
            _ => Ok(()),
        }
    }

    fn commit(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        self.rec.push("commit");
        if self.committed { return Err(EngineError::AlreadyCommitted); }
        self.committed = true;
        if self.behavior.fail_commit { return Err(EngineError::Io("disk full".into())); }
        if self.behavior.decline_commit { return Ok(None); }
        let mut out = b"LABELLED:".to_vec();
        out.extend_from_slice(&self.payload);
        Ok(Some(out))
    }

    fn notify_commit_successful(&mut self, content_identifier: &str) {
        self.rec.push(format!("notify:{}", content_identifier));
    }
}

/// Token provider that answers from a script and records every scope it was asked for.
#[derive(Default)]
pub struct ScriptedTokenProvider {
    pub consent_required: Mutex<HashSet<String>>,
    pub fail_with: Mutex<Option<String>>,
    pub requests: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedTokenProvider {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn require_consent(&self, upn: &str) { self.consent_required.lock().insert(upn.to_string()); }

    pub fn scopes_requested(&self) -> Vec<String> {
        self.requests.lock().iter().flat_map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl TokenProvider for ScriptedTokenProvider {
    async fn get_token(&self, user: &UserContext, scopes: &[String], _tenant: Option<&str>) -> Result<AccessToken, TokenError> {
        self.requests.lock().push((user.identity.upn().to_string(), scopes.to_vec()));
        if self.consent_required.lock().contains(user.identity.upn()) {
            return Err(TokenError::ConsentRequired);
        }
        if let Some(msg) = self.fail_with.lock().clone() {
            return Err(TokenError::Failed(msg));
        }
        Ok(AccessToken::new(format!("tok-{}", user.identity.upn()), Duration::from_secs(600)))
    }
}
