//! Document protection: rights mapping and the per-document flow.

pub mod orchestrator;
pub mod rights;

pub use orchestrator::{
    protect_document, protect_document_async, DocumentFlow, DocumentRequest, FlowState, LabelAssignment,
    ProtectionOutcome,
};
pub use rights::{map_tier, parse_recipients, Permission, ProtectionRequest, RightsGrant, RightsTier};
