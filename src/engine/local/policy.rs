use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, EngineLabel};

/// One label as stored in a local policy file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLabel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sensitivity: i32,
    /// Assigning this label needs a non-empty justification message.
    #[serde(default)]
    pub requires_justification: bool,
    /// The label lets the user pick recipients; labelling without protection is refused.
    #[serde(default)]
    pub adhoc_protection: bool,
    #[serde(default)]
    pub children: Vec<PolicyLabel>,
}

impl PolicyLabel {
    fn to_engine_label(&self) -> EngineLabel {
        EngineLabel {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            sensitivity: self.sensitivity,
            children: self.children.iter().map(|c| c.to_engine_label()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPolicy {
    pub labels: Vec<PolicyLabel>,
}

impl LabelPolicy {
    pub fn from_json(text: &str) -> Result<Self, EngineError> {
        let policy: LabelPolicy = serde_json::from_str(text)
            .map_err(|e| EngineError::Policy(format!("invalid label policy: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Policy(format!("cannot read label policy {}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&PolicyLabel> = self.labels.iter().collect();
        while let Some(l) = stack.pop() {
            if l.id.trim().is_empty() {
                return Err(EngineError::Policy(format!("label '{}' has an empty id", l.name)));
            }
            if !seen.insert(l.id.as_str()) {
                return Err(EngineError::Policy(format!("duplicate label id {}", l.id)));
            }
            stack.extend(l.children.iter());
        }
        Ok(())
    }

    pub fn find(&self, id: &str) -> Option<&PolicyLabel> {
        let mut stack: Vec<&PolicyLabel> = self.labels.iter().collect();
        while let Some(l) = stack.pop() {
            if l.id == id { return Some(l); }
            stack.extend(l.children.iter());
        }
        None
    }

    pub fn engine_labels(&self) -> Vec<EngineLabel> {
        self.labels.iter().map(|l| l.to_engine_label()).collect()
    }

    /// Default tenant-like policy used when no policy file is configured.
    pub fn builtin() -> Self {
        fn label(id: &str, name: &str, description: &str, sensitivity: i32) -> PolicyLabel {
            PolicyLabel {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
                sensitivity,
                requires_justification: false,
                adhoc_protection: false,
                children: Vec::new(),
            }
        }
        let public = label("87ba5c36-b7cf-4793-bbc2-bd5b3a9f95ca", "Public", "Business data specifically prepared for public consumption.", 0);
        let general = label("f42aa342-8706-4288-bd11-ebb85995028c", "General", "Business data not intended for public consumption.", 1);
        let mut confidential = label("074e257c-5848-4582-9a6f-34a182080e71", "Confidential", "Sensitive business data that could cause damage if shared with unauthorized people.", 2);
        confidential.children = vec![
            label("a9df3b9b-6d6b-4b29-9f3c-8cf5a4d8e2b1", "All Employees", "Confidential data readable by all employees.", 2),
            PolicyLabel {
                adhoc_protection: true,
                ..label("2a2c1b7e-4a0f-4c0c-9d8f-4a1b6f0f8e21", "Specified People", "Confidential data shared with recipients you choose.", 2)
            },
        ];
        let mut highly = label("fb3ee2d3-1d5c-4e4b-8b4e-2a8f5f9d6c7e", "Highly Confidential", "Very sensitive business data.", 3);
        highly.requires_justification = true;
        highly.children = vec![
            PolicyLabel {
                requires_justification: true,
                ..label("3c0a6e2f-9b8d-4e8a-a0b5-7d1c2e3f4a5b", "All Employees", "Highly confidential data readable by all employees.", 3)
            },
        ];
        LabelPolicy { labels: vec![public, general, confidential, highly] }
    }
}
