use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::engine::{ProtectionDescriptor, UserRights};

/// Fine-grained usage right. Ordering follows increasing privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Permission {
    View,
    Edit,
    Copy,
    Print,
}

impl Permission {
    pub fn token(&self) -> &'static str {
        match self {
            Permission::View => "VIEW",
            Permission::Edit => "EDIT",
            Permission::Copy => "COPY",
            Permission::Print => "PRINT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RightsTier {
    View,
    Edit,
    All,
}

impl RightsTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "view" => Some(RightsTier::View),
            "edit" => Some(RightsTier::Edit),
            "all" => Some(RightsTier::All),
            _ => None,
        }
    }

    pub fn permissions(self) -> BTreeSet<Permission> {
        match self {
            RightsTier::View => BTreeSet::from([Permission::View]),
            RightsTier::Edit => BTreeSet::from([Permission::View, Permission::Edit]),
            RightsTier::All => BTreeSet::from([Permission::View, Permission::Edit, Permission::Copy, Permission::Print]),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RightsTier::View => "View",
            RightsTier::Edit => "Edit",
            RightsTier::All => "All",
        }
    }
}

/// Coarse tier name to permission set. Unknown or empty names get view-only.
pub fn map_tier(tier: &str) -> BTreeSet<Permission> {
    RightsTier::parse(tier).unwrap_or(RightsTier::View).permissions()
}

/// Split a comma separated recipient list: trimmed, empties dropped, first occurrence kept.
pub fn parse_recipients(csv: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for r in csv.split(',').map(str::trim).filter(|r| !r.is_empty()) {
        if !out.iter().any(|o| o == r) {
            out.push(r.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtectionRequest {
    pub recipients: Vec<String>,
    pub rights_tier: String,
}

impl ProtectionRequest {
    pub fn new(recipients: Vec<String>, rights_tier: impl Into<String>) -> Self {
        Self { recipients, rights_tier: rights_tier.into() }
    }

    pub fn from_form(recipients_csv: &str, rights_tier: Option<&str>) -> Self {
        Self::new(parse_recipients(recipients_csv), rights_tier.unwrap_or("View"))
    }

    /// No recipients means label only.
    pub fn requests_protection(&self) -> bool {
        !self.recipients.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RightsGrant {
    pub recipients: Vec<String>,
    pub permissions: BTreeSet<Permission>,
}

impl RightsGrant {
    /// `None` when the request does not ask for protection.
    pub fn from_request(req: &ProtectionRequest) -> Option<Self> {
        if !req.requests_protection() { return None; }
        Some(Self { recipients: req.recipients.clone(), permissions: map_tier(&req.rights_tier) })
    }

    pub fn to_descriptor(&self) -> ProtectionDescriptor {
        ProtectionDescriptor {
            user_rights: vec![UserRights {
                users: self.recipients.clone(),
                rights: self.permissions.iter().map(|p| p.token().to_string()).collect(),
            }],
        }
    }
}
