//!
//! Classification/rights engine contract
//! -------------------------------------
//! The engine is an external capability: a runtime that is bootstrapped once per
//! process, profiles backed by a durable cache, per-identity engines that know the
//! label policy, and per-document handlers that accept label and protection changes
//! and commit them into new content.
//!
//! Every call here is blocking. Callers on the async side run them under
//! `tokio::task::spawn_blocking`; engines call back into `AuthDelegate` from those
//! same blocking threads whenever they need a token.

pub mod local;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identity::{Identity, TokenError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("runtime not available: {0}")]
    Runtime(String),
    #[error("authentication failed: {0}")]
    Auth(#[from] TokenError),
    /// The label mandates a justification message that was not supplied.
    #[error("label '{0}' requires a justification")]
    JustificationRequired(String),
    /// The label lets the user define permissions, and none were set before labelling.
    #[error("label '{0}' requires user-defined protection")]
    AdhocProtectionRequired(String),
    #[error("content not supported: {0}")]
    UnsupportedContent(String),
    #[error("invalid protection: {0}")]
    InvalidProtection(String),
    #[error("handler already committed")]
    AlreadyCommitted,
    #[error("io error: {0}")]
    Io(String),
    #[error("policy error: {0}")]
    Policy(String),
}

impl EngineError {
    /// Refusals the user resolves by resubmitting with more context.
    pub fn requires_additional_info(&self) -> bool {
        matches!(self, EngineError::JustificationRequired(_) | EngineError::AdhocProtectionRequired(_))
    }

    pub fn is_consent_required(&self) -> bool {
        matches!(self, EngineError::Auth(TokenError::ConsentRequired))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self { EngineError::Io(e.to_string()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub application_id: String,
    pub application_name: String,
    pub application_version: String,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub application: ApplicationInfo,
    pub data_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStorage {
    OnDisk,
    InMemory,
}

#[derive(Debug, Clone)]
pub struct ProfileSettings {
    pub application: ApplicationInfo,
    pub cache_path: PathBuf,
    pub cache_storage: CacheStorage,
}

/// Engine-side token callback. Called synchronously from engine threads.
pub trait AuthDelegate: Send + Sync {
    fn acquire_token(&self, identity: &Identity, authority: &str, resource: &str, claim: Option<&str>) -> Result<String, TokenError>;
}

#[derive(Clone)]
pub struct EngineSettings {
    pub engine_id: String,
    pub identity: Identity,
    pub auth_delegate: Arc<dyn AuthDelegate>,
    pub client_data: String,
    pub locale: String,
}

/// A label exactly as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLabel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensitivity: i32,
    #[serde(default)]
    pub children: Vec<EngineLabel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    Standard,
    Privileged,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelingOptions {
    pub justification_message: String,
    pub assignment_method: AssignmentMethod,
    pub extended_properties: Vec<(String, String)>,
}

impl LabelingOptions {
    pub fn standard(justification: Option<&str>) -> Self {
        Self {
            justification_message: justification.unwrap_or("").trim().to_string(),
            assignment_method: AssignmentMethod::Standard,
            extended_properties: Vec::new(),
        }
    }
}

/// One recipient group with the permission tokens it is granted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRights {
    pub users: Vec<String>,
    pub rights: Vec<String>,
}

/// Ad-hoc protection to bind to a document. Opaque to everything above the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionDescriptor {
    pub user_rights: Vec<UserRights>,
}

#[derive(Debug, Clone)]
pub enum HandlerSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

pub trait ClassificationRuntime: Send + Sync {
    /// Native bootstrap. Callers guarantee this runs at most once per process.
    fn initialize(&self, config: &RuntimeConfig) -> Result<(), EngineError>;
    fn load_profile(&self, settings: ProfileSettings) -> Result<Arc<dyn Profile>, EngineError>;
}

pub trait Profile: Send + Sync {
    fn add_engine(&self, settings: EngineSettings) -> Result<Arc<dyn Engine>, EngineError>;
}

pub trait Engine: Send + Sync {
    fn engine_id(&self) -> &str;
    fn sensitivity_labels(&self) -> Result<Vec<EngineLabel>, EngineError>;
    /// Looks through parents and their children.
    fn label_by_id(&self, id: &str) -> Result<Option<EngineLabel>, EngineError>;
    fn create_handler(&self, source: HandlerSource, content_identifier: &str, audit_discovery: bool) -> Result<Box<dyn FileHandler>, EngineError>;
}

pub trait FileHandler: Send {
    fn set_protection(&mut self, descriptor: &ProtectionDescriptor) -> Result<(), EngineError>;
    fn set_label(&mut self, label: &EngineLabel, options: &LabelingOptions) -> Result<(), EngineError>;
    /// `Ok(None)` means the engine declined to write output (nothing committed).
    fn commit(&mut self) -> Result<Option<Vec<u8>>, EngineError>;
    /// Audit hook, called once after a successful commit.
    fn notify_commit_successful(&mut self, content_identifier: &str);
}
