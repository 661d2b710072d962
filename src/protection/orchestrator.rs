//! Document flow: one handler driven through protection, labelling and a single commit.
//!
//! `DocumentFlow` tracks its `FlowState` explicitly and rejects out-of-order calls with
//! `ProtectError::InvalidState`. `commit` consumes the flow, so a second commit on the
//! same handler cannot be expressed.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::rights::{ProtectionRequest, RightsGrant};
use crate::engine::{Engine, EngineLabel, FileHandler, HandlerSource, LabelingOptions};
use crate::error::ProtectError;
use crate::session::EngineSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Created,
    LabelPending,
    ProtectionApplied,
    Labeled,
    /// Terminal: the engine wants more input before it accepts the label.
    AdditionalInfoRequired,
    Committed,
    Notified,
    CommitFailed,
}

/// Result of a label assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelAssignment {
    Assigned,
    AdditionalInfoRequired(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectionOutcome {
    pub success: bool,
    pub bytes: Option<Vec<u8>>,
    pub requires_additional_info: bool,
}

impl ProtectionOutcome {
    pub fn protected(bytes: Vec<u8>) -> Self {
        Self { success: true, bytes: Some(bytes), requires_additional_info: false }
    }

    pub fn additional_info_required() -> Self {
        Self { success: false, bytes: None, requires_additional_info: true }
    }

    pub fn failed() -> Self { Self::default() }
}

#[derive(Debug, Clone)]
pub struct DocumentRequest {
    pub content: HandlerSource,
    pub file_name: String,
    pub label_id: String,
    pub justification: Option<String>,
    pub protection: ProtectionRequest,
}

pub struct DocumentFlow<'e> {
    engine: &'e dyn Engine,
    handler: Box<dyn FileHandler>,
    file_name: String,
    label: Option<EngineLabel>,
    state: FlowState,
}

impl<'e> DocumentFlow<'e> {
    pub fn create(engine: &'e dyn Engine, content: HandlerSource, file_name: &str) -> Result<Self, ProtectError> {
        let handler = engine
            .create_handler(content, file_name, true)
            .map_err(|e| ProtectError::from_engine(e, ProtectError::HandlerCreationFailed))?;
        debug!(target: "protect", file = file_name, "handler created");
        Ok(Self { engine, handler, file_name: file_name.to_string(), label: None, state: FlowState::Created })
    }

    pub fn state(&self) -> FlowState { self.state }

    pub fn label(&self) -> Option<&EngineLabel> { self.label.as_ref() }

    fn expect(&self, operation: &'static str, allowed: &[FlowState]) -> Result<(), ProtectError> {
        if allowed.contains(&self.state) { Ok(()) } else { Err(ProtectError::InvalidState { operation, from: self.state }) }
    }

    pub fn resolve_label(&mut self, label_id: &str) -> Result<&EngineLabel, ProtectError> {
        self.expect("resolve_label", &[FlowState::Created])?;
        let id = label_id.trim();
        if id.is_empty() {
            return Err(ProtectError::LabelNotFound(String::new()));
        }
        let found = self
            .engine
            .label_by_id(id)
            .map_err(|e| ProtectError::from_engine(e, ProtectError::EngineUnavailable))?;
        let Some(label) = found else {
            return Err(ProtectError::LabelNotFound(id.to_string()));
        };
        self.state = FlowState::LabelPending;
        Ok(self.label.insert(label))
    }

    pub fn apply_protection(&mut self, grant: &RightsGrant) -> Result<(), ProtectError> {
        self.expect("apply_protection", &[FlowState::LabelPending])?;
        self.handler
            .set_protection(&grant.to_descriptor())
            .map_err(|e| ProtectError::from_engine(e, ProtectError::ProtectionFailed))?;
        debug!(target: "protect", recipients = grant.recipients.len(), permissions = grant.permissions.len(), "protection set");
        self.state = FlowState::ProtectionApplied;
        Ok(())
    }

    pub fn assign_label(&mut self, justification: Option<&str>) -> Result<LabelAssignment, ProtectError> {
        self.expect("assign_label", &[FlowState::LabelPending, FlowState::ProtectionApplied])?;
        let Some(label) = self.label.as_ref() else {
            return Err(ProtectError::InvalidState { operation: "assign_label", from: self.state });
        };
        match self.handler.set_label(label, &LabelingOptions::standard(justification)) {
            Ok(()) => {
                self.state = FlowState::Labeled;
                Ok(LabelAssignment::Assigned)
            }
            Err(e) if e.requires_additional_info() => {
                info!(target: "protect", label = %label.id, "label needs additional information: {}", e);
                self.state = FlowState::AdditionalInfoRequired;
                Ok(LabelAssignment::AdditionalInfoRequired(e.to_string()))
            }
            Err(e) => Err(ProtectError::from_engine(e, ProtectError::LabelingFailed)),
        }
    }

    /// Commit exactly once. A declined commit is `{success: false}`; an engine error is `CommitFailed`.
    pub fn commit(mut self) -> Result<ProtectionOutcome, ProtectError> {
        self.expect("commit", &[FlowState::Labeled])?;
        self.state = FlowState::Committed;
        match self.handler.commit() {
            Ok(Some(bytes)) => {
                self.handler.notify_commit_successful(&self.file_name);
                self.state = FlowState::Notified;
                info!(target: "protect", file = %self.file_name, bytes = bytes.len(), "document committed");
                Ok(ProtectionOutcome::protected(bytes))
            }
            Ok(None) => {
                self.state = FlowState::CommitFailed;
                warn!(target: "protect", file = %self.file_name, "engine declined to write output");
                Ok(ProtectionOutcome::failed())
            }
            Err(e) => {
                self.state = FlowState::CommitFailed;
                error!(target: "protect", file = %self.file_name, "commit failed: {}", e);
                Err(ProtectError::CommitFailed(e.to_string()))
            }
        }
    }
}

/// Blocking end-to-end flow: create, resolve, protect if asked, label, commit.
pub fn protect_document(engine: &dyn Engine, req: DocumentRequest) -> Result<ProtectionOutcome, ProtectError> {
    let mut flow = DocumentFlow::create(engine, req.content, &req.file_name)?;
    flow.resolve_label(&req.label_id)?;
    match RightsGrant::from_request(&req.protection) {
        Some(grant) => flow.apply_protection(&grant)?,
        None => debug!(target: "protect", "no recipients, label only"),
    }
    match flow.assign_label(req.justification.as_deref())? {
        LabelAssignment::Assigned => flow.commit(),
        LabelAssignment::AdditionalInfoRequired(_) => Ok(ProtectionOutcome::additional_info_required()),
    }
}

pub async fn protect_document_async(session: &EngineSession, req: DocumentRequest) -> Result<ProtectionOutcome, ProtectError> {
    let engine: Arc<dyn Engine> = session.engine();
    tokio::task::spawn_blocking(move || protect_document(engine.as_ref(), req))
        .await
        .map_err(|e| ProtectError::EngineUnavailable(format!("protection task aborted: {}", e)))?
}
