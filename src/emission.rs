//! Review emission routine
//!
//! One invocation turns one reviewer into at most one persisted review.
//! Looping belongs to the host's continuous workers, not here.

use chrono::Utc;
use rand::Rng;
use rand::seq::IteratorRandom;

use crate::domain::{GradeRange, Review, Reviewer};
use crate::store::ReviewStore;

/// Draw one grade from `[min, max)`; a degenerate range yields `min`.
pub fn sample_grade<R: Rng + ?Sized>(range: GradeRange, rng: &mut R) -> u8 {
    if range.min >= range.max {
        range.min
    } else {
        rng.random_range(range.min..range.max)
    }
}

/// Build a review for a uniformly chosen teacher. None if the reviewer has
/// no teachers.
pub fn draw_review<R: Rng + ?Sized>(reviewer: &Reviewer, rng: &mut R) -> Option<Review> {
    let teacher_id = *reviewer.teachers.iter().choose(&mut *rng)?;
    let grades = &reviewer.grades;
    Some(Review::new(
        reviewer.id,
        teacher_id,
        sample_grade(grades.teaching_quality, &mut *rng),
        sample_grade(grades.student_support, &mut *rng),
        sample_grade(grades.communication, &mut *rng),
        Utc::now(),
    ))
}

/// Draw and persist a review. Store failures are logged and swallowed.
///
/// Returns the new review id when a row was written.
pub async fn emit_review(reviewer: &Reviewer, store: &dyn ReviewStore) -> Option<i64> {
    let review = {
        let mut rng = rand::rng();
        draw_review(reviewer, &mut rng)
    };
    let Some(review) = review else {
        tracing::debug!(reviewer_id = reviewer.id, "Reviewer has no teachers, nothing emitted");
        return None;
    };

    match store.insert_review(&review).await {
        Ok(id) => {
            tracing::info!(
                reviewer_id = reviewer.id,
                teacher_id = review.teacher_id,
                review_id = id,
                overall = review.overall,
                "Review emitted"
            );
            Some(id)
        }
        Err(e) => {
            tracing::error!(
                reviewer_id = reviewer.id,
                teacher_id = review.teacher_id,
                error = %e,
                "Failed to persist review"
            );
            None
        }
    }
}
