//! Reviewer record and its execution policy
//!
//! A Reviewer is pure data: identity, grading ranges, assigned teachers and the
//! temporal policy its generation follows. The `running` flag is runtime state
//! owned by the generator host and is never persisted.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GeneratorError, Result};
use crate::jobs::parse_schedule;

/// Stable identity assigned by the persistent store
pub type ReviewerId = i64;

/// Teacher reference (store id)
pub type TeacherId = i64;

/// Lowest grade a range may start at
pub const GRADE_MIN: u8 = 1;

/// Highest grade a range may end at
pub const GRADE_MAX: u8 = 100;

/// A `{min, max}` grading window for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeRange {
    pub min: u8,
    pub max: u8,
}

impl GradeRange {
    /// Create a validated range within `[GRADE_MIN, GRADE_MAX]` with `min <= max`
    pub fn new(min: u8, max: u8) -> Result<Self> {
        let range = Self { min, max };
        range.validate("grade")?;
        Ok(range)
    }

    fn validate(&self, category: &str) -> Result<()> {
        if self.min < GRADE_MIN || self.max > GRADE_MAX {
            return Err(GeneratorError::InvalidReviewer(format!(
                "{} range {}..{} outside {}..={}",
                category, self.min, self.max, GRADE_MIN, GRADE_MAX
            )));
        }
        if self.min > self.max {
            return Err(GeneratorError::InvalidReviewer(format!(
                "{} range min {} exceeds max {}",
                category, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Whether `value` can come out of sampling this range.
    ///
    /// Sampling is half-open `[min, max)`; a degenerate range yields `min`.
    pub fn admits(&self, value: u8) -> bool {
        if self.min == self.max {
            value == self.min
        } else {
            self.min <= value && value < self.max
        }
    }
}

/// The three grading categories of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeRanges {
    pub teaching_quality: GradeRange,
    pub student_support: GradeRange,
    pub communication: GradeRange,
}

impl GradeRanges {
    /// Same range for every category
    pub fn uniform(range: GradeRange) -> Self {
        Self {
            teaching_quality: range,
            student_support: range,
            communication: range,
        }
    }

    fn validate(&self) -> Result<()> {
        self.teaching_quality.validate("teaching quality")?;
        self.student_support.validate("student support")?;
        self.communication.validate("communication")?;
        Ok(())
    }
}

/// Payload-free tag of an execution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Immediate,
    Delayed,
    Recurring,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::Immediate => "immediate",
            PolicyKind::Delayed => "delayed",
            PolicyKind::Recurring => "recurring",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "immediate" | "fire-and-forget" => Ok(PolicyKind::Immediate),
            "delayed" => Ok(PolicyKind::Delayed),
            "recurring" => Ok(PolicyKind::Recurring),
            other => Err(GeneratorError::InvalidOperation(format!(
                "unknown policy type '{}'",
                other
            ))),
        }
    }
}

/// When and how a reviewer's generation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ExecutionPolicy {
    /// Run once, as soon as possible
    Immediate,
    /// Run once after the given delay
    Delayed(Duration),
    /// Run repeatedly per cron expression
    Recurring(String),
}

impl ExecutionPolicy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            ExecutionPolicy::Immediate => PolicyKind::Immediate,
            ExecutionPolicy::Delayed(_) => PolicyKind::Delayed,
            ExecutionPolicy::Recurring(_) => PolicyKind::Recurring,
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self, ExecutionPolicy::Recurring(_))
    }
}

/// A configured synthetic-review producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reviewer {
    /// Store-assigned identity, immutable after creation
    pub id: ReviewerId,

    /// Display label
    pub name: String,

    /// Per-category grading windows
    pub grades: GradeRanges,

    /// Temporal policy
    pub policy: ExecutionPolicy,

    /// Assigned teachers; empty means the reviewer cannot be started
    pub teachers: BTreeSet<TeacherId>,

    /// True only while a continuous worker is active
    #[serde(skip)]
    pub running: bool,
}

impl Reviewer {
    pub fn new(
        id: ReviewerId,
        name: impl Into<String>,
        grades: GradeRanges,
        policy: ExecutionPolicy,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            grades,
            policy,
            teachers: BTreeSet::new(),
            running: false,
        }
    }

    /// Builder-style teacher assignment
    pub fn with_teachers(mut self, teachers: impl IntoIterator<Item = TeacherId>) -> Self {
        self.teachers.extend(teachers);
        self
    }

    /// A reviewer needs at least one teacher to produce reviews
    pub fn can_start(&self) -> bool {
        !self.teachers.is_empty()
    }

    /// Check name, grade ranges and the cron expression of a recurring policy
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GeneratorError::InvalidReviewer(
                "name must not be empty".to_string(),
            ));
        }
        self.grades.validate()?;
        if let ExecutionPolicy::Recurring(cron) = &self.policy {
            parse_schedule(cron)?;
        }
        Ok(())
    }
}
