//! Unified application error model and mapping helpers.
//! `ProtectError` is the failure taxonomy of the protection core (session, catalog,
//! orchestrator). `AppError` is the protocol-facing shape the HTTP front end renders,
//! with a stable code, a user-safe message and an HTTP status.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::engine::EngineError;
use crate::identity::TokenError;
use crate::protection::FlowState;

/// Failures raised while establishing a session or protecting a document.
///
/// "Additional information required" is deliberately absent: it is an outcome
/// (`ProtectionOutcome::requires_additional_info`), not an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtectError {
    /// The identity provider needs an interactive step before a token can be issued.
    #[error("user consent required")]
    ConsentRequired,
    #[error("token acquisition failed: {0}")]
    TokenAcquisitionFailed(String),
    /// One-time runtime bootstrap failed; memoized for the life of the process.
    #[error("engine runtime bootstrap failed: {0}")]
    BootstrapFailed(String),
    #[error("no user identity available for this request")]
    IdentityMissing,
    #[error("engine creation failed: {0}")]
    EngineCreationFailed(String),
    #[error("engine call failed: {0}")]
    EngineUnavailable(String),
    #[error("document handler creation failed: {0}")]
    HandlerCreationFailed(String),
    #[error("label not found: {0}")]
    LabelNotFound(String),
    #[error("protection could not be applied: {0}")]
    ProtectionFailed(String),
    #[error("label could not be applied: {0}")]
    LabelingFailed(String),
    #[error("commit failed: {0}")]
    CommitFailed(String),
    #[error("invalid document flow transition: {operation} from {from:?}")]
    InvalidState { operation: &'static str, from: FlowState },
}

impl ProtectError {
    /// True for failures the user can fix by changing their form input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, ProtectError::HandlerCreationFailed(_) | ProtectError::LabelNotFound(_))
    }

    /// Consent and token failures keep their class wherever the engine raises them;
    /// everything else is wrapped as the failing step's error.
    pub fn from_engine(err: EngineError, wrap: fn(String) -> ProtectError) -> Self {
        match err {
            EngineError::Auth(TokenError::ConsentRequired) => ProtectError::ConsentRequired,
            EngineError::Auth(TokenError::Failed(msg)) => ProtectError::TokenAcquisitionFailed(msg),
            other => wrap(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Auth { code: String, message: String },
    Consent { code: String, message: String },
    Csrf { code: String, message: String },
    Engine { code: String, message: String },
    Io { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Consent { code, .. }
            | AppError::Csrf { code, .. }
            | AppError::Engine { code, .. }
            | AppError::Io { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Consent { message, .. }
            | AppError::Csrf { message, .. }
            | AppError::Engine { message, .. }
            | AppError::Io { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn consent<S: Into<String>>(code: S, msg: S) -> Self { AppError::Consent { code: code.into(), message: msg.into() } }
    pub fn csrf<S: Into<String>>(code: S, msg: S) -> Self { AppError::Csrf { code: code.into(), message: msg.into() } }
    pub fn engine<S: Into<String>>(code: S, msg: S) -> Self { AppError::Engine { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Auth { .. } => 401,
            AppError::Consent { .. } => 302,
            AppError::Csrf { .. } => 403,
            AppError::Engine { .. } => 502,
            AppError::Io { .. } => 503,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal_error".into(), message: err.to_string() }
    }
}

/// Engine and token failures collapse to generic messages; the detail stays in the logs.
impl From<ProtectError> for AppError {
    fn from(err: ProtectError) -> Self {
        match err {
            ProtectError::ConsentRequired => AppError::consent("consent_required", "Additional consent is required."),
            ProtectError::IdentityMissing => AppError::auth("identity_missing", "Sign-in is required."),
            ProtectError::LabelNotFound(_) => AppError::not_found("label_not_found", "The selected label is no longer available."),
            ProtectError::HandlerCreationFailed(_) => AppError::user("unsupported_document", "The document could not be prepared for labelling."),
            ProtectError::BootstrapFailed(_) => AppError::internal("bootstrap_failed", "The labelling service is unavailable."),
            ProtectError::TokenAcquisitionFailed(_)
            | ProtectError::EngineCreationFailed(_)
            | ProtectError::EngineUnavailable(_)
            | ProtectError::ProtectionFailed(_)
            | ProtectError::LabelingFailed(_)
            | ProtectError::CommitFailed(_) => AppError::engine("processing_failed", "An error occurred during download."),
            ProtectError::InvalidState { .. } => AppError::internal("internal_error", "An error occurred during download."),
        }
    }
}
