use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::policy::LabelPolicy;
use super::{AUTHORITY, PROTECTION_RESOURCE};
use crate::engine::{AssignmentMethod, AuthDelegate, EngineError, EngineLabel, FileHandler, LabelingOptions, ProtectionDescriptor};
use crate::identity::Identity;

/// First line of every document the local engine writes.
pub const CONTAINER_MAGIC: &[u8] = b"SENSILABEL/1\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedLabel {
    pub id: String,
    pub name: String,
    pub assignment_method: AssignmentMethod,
    pub justification: String,
}

/// Metadata line written between the magic and the original payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub content_id: String,
    pub owner: String,
    pub label: Option<AppliedLabel>,
    pub protection: Option<ProtectionDescriptor>,
    pub committed_at: DateTime<Utc>,
}

/// Split a container into header and payload; `None` when `bytes` is not one.
pub fn read_container(bytes: &[u8]) -> Option<Result<(ContainerHeader, &[u8]), EngineError>> {
    let rest = bytes.strip_prefix(CONTAINER_MAGIC)?;
    let Some(nl) = rest.iter().position(|b| *b == b'\n') else {
        return Some(Err(EngineError::UnsupportedContent("truncated container header".into())));
    };
    let header = serde_json::from_slice::<ContainerHeader>(&rest[..nl])
        .map_err(|e| EngineError::UnsupportedContent(format!("corrupt container header: {}", e)));
    Some(header.map(|h| (h, &rest[nl + 1..])))
}

pub struct LocalHandler {
    content_id: String,
    payload: Vec<u8>,
    previous: Option<ContainerHeader>,
    owner: Identity,
    delegate: Arc<dyn AuthDelegate>,
    policy: Arc<LabelPolicy>,
    label: Option<(EngineLabel, LabelingOptions)>,
    protection: Option<ProtectionDescriptor>,
    committed: bool,
    audit_log: Option<PathBuf>,
}

impl LocalHandler {
    pub(super) fn open(
        bytes: Vec<u8>,
        content_id: &str,
        owner: Identity,
        delegate: Arc<dyn AuthDelegate>,
        policy: Arc<LabelPolicy>,
        audit_log: Option<PathBuf>,
    ) -> Result<Self, EngineError> {
        if bytes.is_empty() {
            return Err(EngineError::UnsupportedContent("empty document".into()));
        }
        let (payload, previous) = match read_container(&bytes) {
            Some(parsed) => {
                let (header, payload) = parsed?;
                (payload.to_vec(), Some(header))
            }
            None => (bytes, None),
        };
        // Relabelling an already protected document keeps its protection unless replaced.
        let protection = previous.as_ref().and_then(|h| h.protection.clone());
        Ok(Self {
            content_id: content_id.to_string(),
            payload,
            previous,
            owner,
            delegate,
            policy,
            label: None,
            protection,
            committed: false,
            audit_log,
        })
    }

    /// Label carried by the document when it was opened.
    fn previous_label_id(&self) -> Option<&str> {
        self.previous.as_ref().and_then(|h| h.label.as_ref()).map(|l| l.id.as_str())
    }

    fn audit(&self, header_label: Option<&str>) {
        let Some(path) = self.audit_log.as_ref() else { return; };
        let line = serde_json::json!({
            "event": "commit",
            "content_id": self.content_id,
            "owner": self.owner.upn(),
            "label_id": header_label,
            "previous_label_id": self.previous_label_id(),
            "protected": self.protection.is_some(),
            "at": Utc::now().to_rfc3339(),
        });
        let res = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{}", line));
        if let Err(e) = res {
            warn!(target: "engine", path = %path.display(), "audit write failed: {}", e);
        }
    }
}

impl FileHandler for LocalHandler {
    fn set_protection(&mut self, descriptor: &ProtectionDescriptor) -> Result<(), EngineError> {
        if self.committed { return Err(EngineError::AlreadyCommitted); }
        if descriptor.user_rights.is_empty() {
            return Err(EngineError::InvalidProtection("no user rights".into()));
        }
        for ur in &descriptor.user_rights {
            if ur.users.is_empty() || ur.rights.is_empty() {
                return Err(EngineError::InvalidProtection("user rights need users and rights".into()));
            }
        }
        // The rights service is contacted as the document owner.
        self.delegate.acquire_token(&self.owner, AUTHORITY, PROTECTION_RESOURCE, None)?;
        self.protection = Some(descriptor.clone());
        Ok(())
    }

    fn set_label(&mut self, label: &EngineLabel, options: &LabelingOptions) -> Result<(), EngineError> {
        if self.committed { return Err(EngineError::AlreadyCommitted); }
        let Some(rule) = self.policy.find(&label.id) else {
            return Err(EngineError::Policy(format!("label {} is not in the policy", label.id)));
        };
        if rule.requires_justification && options.justification_message.trim().is_empty() {
            return Err(EngineError::JustificationRequired(rule.name.clone()));
        }
        if rule.adhoc_protection && self.protection.is_none() {
            return Err(EngineError::AdhocProtectionRequired(rule.name.clone()));
        }
        self.label = Some((label.clone(), options.clone()));
        Ok(())
    }

    fn commit(&mut self) -> Result<Option<Vec<u8>>, EngineError> {
        if self.committed { return Err(EngineError::AlreadyCommitted); }
        if self.label.is_none() && self.protection.is_none() {
            return Ok(None);
        }
        let header = ContainerHeader {
            content_id: self.content_id.clone(),
            owner: self.owner.upn().to_string(),
            label: self.label.as_ref().map(|(l, o)| AppliedLabel {
                id: l.id.clone(),
                name: l.name.clone(),
                assignment_method: o.assignment_method,
                justification: o.justification_message.clone(),
            }),
            protection: self.protection.clone(),
            committed_at: Utc::now(),
        };
        let header_json = serde_json::to_vec(&header)
            .map_err(|e| EngineError::Io(format!("header encode: {}", e)))?;
        let mut out = Vec::with_capacity(CONTAINER_MAGIC.len() + header_json.len() + 1 + self.payload.len());
        out.extend_from_slice(CONTAINER_MAGIC);
        out.extend_from_slice(&header_json);
        out.push(b'\n');
        out.extend_from_slice(&self.payload);
        self.committed = true;
        Ok(Some(out))
    }

    fn notify_commit_successful(&mut self, content_identifier: &str) {
        let label_id = self.label.as_ref().map(|(l, _)| l.id.clone());
        info!(target: "engine", content = content_identifier, owner = %self.owner, label = ?label_id, "commit recorded");
        self.audit(label_id.as_deref());
    }
}
