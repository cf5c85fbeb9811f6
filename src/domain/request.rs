//! One-off review generation request

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::reviewer::{ExecutionPolicy, PolicyKind, ReviewerId};

/// Request to schedule generation for a reviewer.
///
/// `kind` is the policy type at request time; it need not match the reviewer's
/// stored policy. `delay` is required for `Delayed`, `cron` for `Recurring`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateReviewRequest {
    pub reviewer_id: ReviewerId,
    pub kind: PolicyKind,
    #[serde(default)]
    pub delay: Option<Duration>,
    #[serde(default)]
    pub cron: Option<String>,
}

impl GenerateReviewRequest {
    pub fn immediate(reviewer_id: ReviewerId) -> Self {
        Self {
            reviewer_id,
            kind: PolicyKind::Immediate,
            delay: None,
            cron: None,
        }
    }

    pub fn delayed(reviewer_id: ReviewerId, delay: Duration) -> Self {
        Self {
            reviewer_id,
            kind: PolicyKind::Delayed,
            delay: Some(delay),
            cron: None,
        }
    }

    pub fn recurring(reviewer_id: ReviewerId, cron: impl Into<String>) -> Self {
        Self {
            reviewer_id,
            kind: PolicyKind::Recurring,
            delay: None,
            cron: Some(cron.into()),
        }
    }

    /// Request mirroring a reviewer's stored policy
    pub fn from_policy(reviewer_id: ReviewerId, policy: &ExecutionPolicy) -> Self {
        match policy {
            ExecutionPolicy::Immediate => Self::immediate(reviewer_id),
            ExecutionPolicy::Delayed(delay) => Self::delayed(reviewer_id, *delay),
            ExecutionPolicy::Recurring(cron) => Self::recurring(reviewer_id, cron.clone()),
        }
    }
}
