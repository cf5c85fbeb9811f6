//! Domain types for revgen
//!
//! This module contains the core domain types:
//! - Reviewer: a configured synthetic-review producer and its execution policy
//! - Review / Teacher: rows owned by the persistent store
//! - GenerateReviewRequest: a one-off dispatch request for the generator host

pub mod request;
pub mod review;
pub mod reviewer;

pub use request::GenerateReviewRequest;
pub use review::{Review, Teacher};
pub use reviewer::{
    ExecutionPolicy, GRADE_MAX, GRADE_MIN, GradeRange, GradeRanges, PolicyKind, Reviewer,
    ReviewerId, TeacherId,
};
