//! Reviewer registry
//!
//! The authoritative in-memory set of reviewers known to the generator host.
//! It carries no lock of its own: the host's single mutex guards it.

use std::collections::HashMap;

use crate::domain::{Reviewer, ReviewerId};

/// Reviewers keyed by id
#[derive(Debug, Default)]
pub struct ReviewerRegistry {
    reviewers: HashMap<ReviewerId, Reviewer>,
}

impl ReviewerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a reviewer. Returns false, leaving the existing record untouched,
    /// when the id is already present.
    pub fn add(&mut self, reviewer: Reviewer) -> bool {
        if self.reviewers.contains_key(&reviewer.id) {
            return false;
        }
        self.reviewers.insert(reviewer.id, reviewer);
        true
    }

    /// Remove a reviewer. Absent ids are a no-op.
    pub fn remove(&mut self, id: ReviewerId) -> Option<Reviewer> {
        self.reviewers.remove(&id)
    }

    pub fn find(&self, id: ReviewerId) -> Option<&Reviewer> {
        self.reviewers.get(&id)
    }

    pub fn find_mut(&mut self, id: ReviewerId) -> Option<&mut Reviewer> {
        self.reviewers.get_mut(&id)
    }

    pub fn contains(&self, id: ReviewerId) -> bool {
        self.reviewers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.reviewers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reviewers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reviewer> {
        self.reviewers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Reviewer> {
        self.reviewers.values_mut()
    }
}

impl FromIterator<Reviewer> for ReviewerRegistry {
    /// Later duplicates are dropped, matching `add`.
    fn from_iter<I: IntoIterator<Item = Reviewer>>(iter: I) -> Self {
        let mut registry = Self::new();
        for reviewer in iter {
            let id = reviewer.id;
            if !registry.add(reviewer) {
                tracing::warn!(reviewer_id = id, "Duplicate reviewer id ignored while loading registry");
            }
        }
        registry
    }
}
