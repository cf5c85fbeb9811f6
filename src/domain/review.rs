//! Store-owned rows: teachers and the reviews generated for them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reviewer::{ReviewerId, TeacherId};

/// A teacher that reviewers can be assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub first_name: String,
    pub last_name: String,
}

impl Teacher {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A generated review. Owned by the store once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Store id, None until inserted
    pub id: Option<i64>,
    pub teacher_id: TeacherId,
    /// Reviewer that produced this row
    pub reviewer_id: ReviewerId,
    pub teaching_quality: u8,
    pub student_support: u8,
    pub communication: u8,
    /// Truncating integer mean of the three categories
    pub overall: f64,
    pub review_time: DateTime<Utc>,
}

impl Review {
    /// Build a review from three category grades
    pub fn new(
        reviewer_id: ReviewerId,
        teacher_id: TeacherId,
        teaching_quality: u8,
        student_support: u8,
        communication: u8,
        review_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            teacher_id,
            reviewer_id,
            teaching_quality,
            student_support,
            communication,
            overall: overall_grade(teaching_quality, student_support, communication),
            review_time,
        }
    }
}

/// Integer mean with truncation, widened to f64 for storage
pub fn overall_grade(a: u8, b: u8, c: u8) -> f64 {
    ((a as u32 + b as u32 + c as u32) / 3) as f64
}
