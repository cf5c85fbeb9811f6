//! Authorization gate for mutating operations
//!
//! Each execution policy maps to a named modification right. Owners hold
//! every right; other callers need the specific one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::PolicyKind;
use crate::error::GeneratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Analyst,
    #[default]
    Visitor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Owner => "owner",
            Role::Analyst => "analyst",
            Role::Visitor => "visitor",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Role::Owner),
            "analyst" => Ok(Role::Analyst),
            "visitor" => Ok(Role::Visitor),
            other => Err(GeneratorError::InvalidOperation(format!("unknown role '{}'", other))),
        }
    }
}

/// Policy name guarding modifications of reviewers with the given policy kind
pub fn policy_name(kind: PolicyKind) -> &'static str {
    match kind {
        PolicyKind::Immediate => "ModifyFireAndForget",
        PolicyKind::Delayed => "ModifyDelayed",
        PolicyKind::Recurring => "ModifyRecurring",
    }
}

/// Identity presented to the gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Caller {
    pub role: Role,
    /// Policy kinds this caller may modify
    pub modifications: Vec<PolicyKind>,
}

impl Caller {
    pub fn new(role: Role, modifications: impl IntoIterator<Item = PolicyKind>) -> Self {
        Self {
            role,
            modifications: modifications.into_iter().collect(),
        }
    }

    pub fn owner() -> Self {
        Self::new(Role::Owner, [])
    }

    pub fn can_modify(&self, kind: PolicyKind) -> bool {
        self.role == Role::Owner || self.modifications.contains(&kind)
    }

    /// `can_modify` as a `Result`, naming the missing policy on denial
    pub fn authorize(&self, kind: PolicyKind) -> Result<(), GeneratorError> {
        if self.can_modify(kind) {
            Ok(())
        } else {
            tracing::warn!(role = %self.role, policy = policy_name(kind), "Modification denied");
            Err(GeneratorError::InvalidOperation(format!(
                "{} role lacks {}",
                self.role,
                policy_name(kind)
            )))
        }
    }
}
