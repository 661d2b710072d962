//! Label catalog: the engine's label hierarchy as the front end sees it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::{Engine, EngineLabel};
use crate::error::ProtectError;
use crate::session::EngineSession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub name: String,
    pub description: String,
    /// As reported by the engine; children are not guaranteed to rank above their parent.
    pub sensitivity: i32,
    pub children: Vec<Label>,
}

impl From<EngineLabel> for Label {
    fn from(l: EngineLabel) -> Self {
        Label {
            id: l.id,
            name: l.name,
            description: l.description,
            sensitivity: l.sensitivity,
            children: l.children.into_iter().map(Label::from).collect(),
        }
    }
}

impl Label {
    /// Depth-first search over this label and its children.
    pub fn find<'a>(labels: &'a [Label], id: &str) -> Option<&'a Label> {
        for l in labels {
            if l.id == id { return Some(l); }
            if let Some(c) = Label::find(&l.children, id) { return Some(c); }
        }
        None
    }
}

/// Blocking listing, for callers already on an engine thread.
pub fn list_labels_blocking(engine: &dyn Engine) -> Result<Vec<Label>, ProtectError> {
    let labels = engine
        .sensitivity_labels()
        .map_err(|e| ProtectError::from_engine(e, ProtectError::EngineUnavailable))?;
    for l in &labels {
        debug!(target: "labels", "{} : {} : {}", l.name, l.sensitivity, l.id);
        for c in &l.children {
            debug!(target: "labels", "  {} : {} : {}", c.name, c.sensitivity, c.id);
        }
    }
    Ok(labels.into_iter().map(Label::from).collect())
}

/// Engine order is preserved and children stay nested. An empty policy is an empty list.
pub async fn list_labels(session: &EngineSession) -> Result<Vec<Label>, ProtectError> {
    let engine = session.engine();
    tokio::task::spawn_blocking(move || list_labels_blocking(engine.as_ref()))
        .await
        .map_err(|e| ProtectError::EngineUnavailable(format!("label listing aborted: {}", e)))?
}
