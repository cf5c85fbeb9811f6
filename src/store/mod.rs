//! Persistent store boundary
//!
//! The generator host reads reviewers from the store once at startup and
//! writes reviews into it. Everything else here serves the CLI's maintenance
//! commands and the durable recurring-job rows.

mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Review, Reviewer, ReviewerId, Teacher, TeacherId};
use crate::error::Result;

pub use sqlite::SqliteReviewStore;

/// A persisted recurring registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringJobRecord {
    pub job_id: String,
    pub reviewer_id: ReviewerId,
    pub cron: String,
}

/// Store of reviewers, teachers and reviews
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Every reviewer with its assigned teacher set
    async fn list_reviewers_with_teachers(&self) -> Result<Vec<Reviewer>>;

    /// Persist a review, returning its new id
    async fn insert_review(&self, review: &Review) -> Result<i64>;

    async fn reviewer_exists(&self, id: ReviewerId) -> Result<bool>;

    async fn teacher_exists(&self, id: TeacherId) -> Result<bool>;

    /// Insert a reviewer and its teacher assignments. The store assigns the
    /// id; `reviewer.id` is ignored.
    async fn insert_reviewer(&self, reviewer: &Reviewer) -> Result<ReviewerId>;

    /// Returns false if no such reviewer existed
    async fn delete_reviewer(&self, id: ReviewerId) -> Result<bool>;

    async fn insert_teacher(&self, first_name: &str, last_name: &str) -> Result<TeacherId>;

    async fn list_teachers(&self) -> Result<Vec<Teacher>>;

    /// Assign teachers; already-assigned ids are skipped
    async fn assign_teachers(&self, reviewer: ReviewerId, teachers: &[TeacherId]) -> Result<()>;

    async fn unassign_teachers(&self, reviewer: ReviewerId, teachers: &[TeacherId]) -> Result<()>;

    /// Reviews, newest first, optionally for one teacher
    async fn list_reviews(&self, teacher: Option<TeacherId>) -> Result<Vec<Review>>;

    /// Insert or replace the row for `job_id`
    async fn save_recurring_job(&self, job_id: &str, reviewer: ReviewerId, cron: &str) -> Result<()>;

    async fn delete_recurring_job(&self, job_id: &str) -> Result<()>;

    async fn list_recurring_jobs(&self) -> Result<Vec<RecurringJobRecord>>;
}
