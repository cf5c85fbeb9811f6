//! SQLite-backed review store

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{Connection, OptionalExtension, params};

use super::{RecurringJobRecord, ReviewStore};
use crate::domain::{
    ExecutionPolicy, GradeRange, GradeRanges, PolicyKind, Review, Reviewer, ReviewerId, Teacher,
    TeacherId,
};
use crate::error::{GeneratorError, Result};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS teachers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS reviewers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    tq_min INTEGER NOT NULL,
    tq_max INTEGER NOT NULL,
    ss_min INTEGER NOT NULL,
    ss_max INTEGER NOT NULL,
    comm_min INTEGER NOT NULL,
    comm_max INTEGER NOT NULL,
    policy_type TEXT NOT NULL,
    delay_ms INTEGER,
    cron TEXT
);

CREATE TABLE IF NOT EXISTS reviewer_teachers (
    reviewer_id INTEGER NOT NULL REFERENCES reviewers(id) ON DELETE CASCADE,
    teacher_id INTEGER NOT NULL REFERENCES teachers(id) ON DELETE CASCADE,
    PRIMARY KEY (reviewer_id, teacher_id)
);

CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    teacher_id INTEGER NOT NULL REFERENCES teachers(id) ON DELETE CASCADE,
    reviewer_id INTEGER NOT NULL,
    teaching_quality INTEGER NOT NULL,
    student_support INTEGER NOT NULL,
    communication INTEGER NOT NULL,
    overall REAL NOT NULL,
    review_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reviews_teacher ON reviews(teacher_id);
CREATE INDEX IF NOT EXISTS idx_reviews_time ON reviews(review_time);

CREATE TABLE IF NOT EXISTS recurring_jobs (
    job_id TEXT PRIMARY KEY,
    reviewer_id INTEGER NOT NULL,
    cron TEXT NOT NULL
);
"#;

/// Review store over a single SQLite connection.
///
/// rusqlite's `Connection` is not `Sync`, so it sits behind a `Mutex`.
/// Statements are short and never held across an await.
pub struct SqliteReviewStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteReviewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteReviewStore").finish_non_exhaustive()
    }
}

/// Raw reviewers row before policy decoding
struct ReviewerRow {
    id: ReviewerId,
    name: String,
    grades: GradeRanges,
    policy_type: String,
    delay_ms: Option<i64>,
    cron: Option<String>,
}

impl SqliteReviewStore {
    /// Open or create a database file, creating parent directories as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| GeneratorError::Storage(e.to_string()))
    }
}

fn policy_columns(policy: &ExecutionPolicy) -> (&'static str, Option<i64>, Option<&str>) {
    match policy {
        ExecutionPolicy::Immediate => (PolicyKind::Immediate.as_str(), None, None),
        ExecutionPolicy::Delayed(delay) => (
            PolicyKind::Delayed.as_str(),
            Some(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)),
            None,
        ),
        ExecutionPolicy::Recurring(cron) => (PolicyKind::Recurring.as_str(), None, Some(cron)),
    }
}

fn policy_from_columns(row: &ReviewerRow) -> Result<ExecutionPolicy> {
    let kind: PolicyKind = row.policy_type.parse()?;
    match kind {
        PolicyKind::Immediate => Ok(ExecutionPolicy::Immediate),
        PolicyKind::Delayed => {
            let ms = row.delay_ms.ok_or_else(|| {
                GeneratorError::Storage(format!("reviewer {} has no delay_ms", row.id))
            })?;
            Ok(ExecutionPolicy::Delayed(Duration::from_millis(
                u64::try_from(ms).unwrap_or(0),
            )))
        }
        PolicyKind::Recurring => {
            let cron = row.cron.clone().ok_or_else(|| {
                GeneratorError::Storage(format!("reviewer {} has no cron", row.id))
            })?;
            Ok(ExecutionPolicy::Recurring(cron))
        }
    }
}

fn review_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
    let millis: i64 = row.get(7)?;
    let review_time = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(7, millis)
    })?;
    Ok(Review {
        id: Some(row.get(0)?),
        teacher_id: row.get(1)?,
        reviewer_id: row.get(2)?,
        teaching_quality: row.get(3)?,
        student_support: row.get(4)?,
        communication: row.get(5)?,
        overall: row.get(6)?,
        review_time,
    })
}

#[async_trait]
impl ReviewStore for SqliteReviewStore {
    async fn list_reviewers_with_teachers(&self) -> Result<Vec<Reviewer>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, tq_min, tq_max, ss_min, ss_max, comm_min, comm_max,
                    policy_type, delay_ms, cron
             FROM reviewers ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReviewerRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    grades: GradeRanges {
                        teaching_quality: GradeRange {
                            min: row.get(2)?,
                            max: row.get(3)?,
                        },
                        student_support: GradeRange {
                            min: row.get(4)?,
                            max: row.get(5)?,
                        },
                        communication: GradeRange {
                            min: row.get(6)?,
                            max: row.get(7)?,
                        },
                    },
                    policy_type: row.get(8)?,
                    delay_ms: row.get(9)?,
                    cron: row.get(10)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut assignments: HashMap<ReviewerId, Vec<TeacherId>> = HashMap::new();
        let mut stmt = conn.prepare("SELECT reviewer_id, teacher_id FROM reviewer_teachers")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, ReviewerId>(0)?, row.get::<_, TeacherId>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (reviewer_id, teacher_id) in pairs {
            assignments.entry(reviewer_id).or_default().push(teacher_id);
        }

        let mut reviewers = Vec::with_capacity(rows.len());
        for row in rows {
            let policy = policy_from_columns(&row)?;
            let teachers = assignments.remove(&row.id).unwrap_or_default();
            reviewers.push(Reviewer::new(row.id, row.name, row.grades, policy).with_teachers(teachers));
        }
        Ok(reviewers)
    }

    async fn insert_review(&self, review: &Review) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reviews (teacher_id, reviewer_id, teaching_quality, student_support,
                                  communication, overall, review_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                review.teacher_id,
                review.reviewer_id,
                review.teaching_quality,
                review.student_support,
                review.communication,
                review.overall,
                review.review_time.timestamp_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn reviewer_exists(&self, id: ReviewerId) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM reviewers WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    async fn teacher_exists(&self, id: TeacherId) -> Result<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row("SELECT 1 FROM teachers WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    async fn insert_reviewer(&self, reviewer: &Reviewer) -> Result<ReviewerId> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let (policy_type, delay_ms, cron) = policy_columns(&reviewer.policy);
        let grades = &reviewer.grades;
        tx.execute(
            "INSERT INTO reviewers (name, tq_min, tq_max, ss_min, ss_max, comm_min, comm_max,
                                    policy_type, delay_ms, cron)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                reviewer.name,
                grades.teaching_quality.min,
                grades.teaching_quality.max,
                grades.student_support.min,
                grades.student_support.max,
                grades.communication.min,
                grades.communication.max,
                policy_type,
                delay_ms,
                cron,
            ],
        )?;
        let id = tx.last_insert_rowid();
        for teacher in &reviewer.teachers {
            tx.execute(
                "INSERT OR IGNORE INTO reviewer_teachers (reviewer_id, teacher_id) VALUES (?1, ?2)",
                params![id, teacher],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    async fn delete_reviewer(&self, id: ReviewerId) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM reviewers WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    async fn insert_teacher(&self, first_name: &str, last_name: &str) -> Result<TeacherId> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO teachers (first_name, last_name) VALUES (?1, ?2)",
            params![first_name, last_name],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn list_teachers(&self) -> Result<Vec<Teacher>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, first_name, last_name FROM teachers ORDER BY id")?;
        let teachers = stmt
            .query_map([], |row| {
                Ok(Teacher {
                    id: row.get(0)?,
                    first_name: row.get(1)?,
                    last_name: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(teachers)
    }

    async fn assign_teachers(&self, reviewer: ReviewerId, teachers: &[TeacherId]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for teacher in teachers {
            tx.execute(
                "INSERT OR IGNORE INTO reviewer_teachers (reviewer_id, teacher_id) VALUES (?1, ?2)",
                params![reviewer, teacher],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn unassign_teachers(&self, reviewer: ReviewerId, teachers: &[TeacherId]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for teacher in teachers {
            tx.execute(
                "DELETE FROM reviewer_teachers WHERE reviewer_id = ?1 AND teacher_id = ?2",
                params![reviewer, teacher],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn list_reviews(&self, teacher: Option<TeacherId>) -> Result<Vec<Review>> {
        let conn = self.conn()?;
        let base = "SELECT id, teacher_id, reviewer_id, teaching_quality, student_support,
                           communication, overall, review_time
                    FROM reviews";
        let reviews = match teacher {
            Some(teacher_id) => {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE teacher_id = ?1 ORDER BY review_time DESC, id DESC",
                    base
                ))?;
                let rows = stmt
                    .query_map(params![teacher_id], review_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("{} ORDER BY review_time DESC, id DESC", base))?;
                let rows = stmt
                    .query_map([], review_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(reviews)
    }

    async fn save_recurring_job(&self, job_id: &str, reviewer: ReviewerId, cron: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO recurring_jobs (job_id, reviewer_id, cron) VALUES (?1, ?2, ?3)",
            params![job_id, reviewer, cron],
        )?;
        Ok(())
    }

    async fn delete_recurring_job(&self, job_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM recurring_jobs WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    async fn list_recurring_jobs(&self) -> Result<Vec<RecurringJobRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT job_id, reviewer_id, cron FROM recurring_jobs ORDER BY job_id")?;
        let jobs = stmt
            .query_map([], |row| {
                Ok(RecurringJobRecord {
                    job_id: row.get(0)?,
                    reviewer_id: row.get(1)?,
                    cron: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn ranges() -> GradeRanges {
        GradeRanges {
            teaching_quality: GradeRange { min: 10, max: 20 },
            student_support: GradeRange { min: 30, max: 40 },
            communication: GradeRange { min: 50, max: 60 },
        }
    }

    async fn store_with_teacher() -> (SqliteReviewStore, TeacherId) {
        let store = SqliteReviewStore::open_in_memory().unwrap();
        let teacher = store.insert_teacher("Grace", "Hopper").await.unwrap();
        (store, teacher)
    }

    #[tokio::test]
    async fn test_reviewer_roundtrip_with_teachers() {
        let (store, teacher) = store_with_teacher().await;
        let other = store.insert_teacher("Alan", "Turing").await.unwrap();

        let reviewer = Reviewer::new(0, "Alice", ranges(), ExecutionPolicy::Delayed(Duration::from_secs(90)))
            .with_teachers([teacher, other]);
        let id = store.insert_reviewer(&reviewer).await.unwrap();

        let loaded = store.list_reviewers_with_teachers().await.unwrap();
        assert_eq!(loaded.len(), 1);
        let r = &loaded[0];
        assert_eq!(r.id, id);
        assert_eq!(r.name, "Alice");
        assert_eq!(r.grades, ranges());
        assert_eq!(r.policy, ExecutionPolicy::Delayed(Duration::from_secs(90)));
        assert_eq!(r.teachers.len(), 2);
        assert!(!r.running);
    }

    #[tokio::test]
    async fn test_recurring_policy_roundtrip() {
        let store = SqliteReviewStore::open_in_memory().unwrap();
        let reviewer = Reviewer::new(0, "Bob", ranges(), ExecutionPolicy::Recurring("*/15 * * * *".into()));
        store.insert_reviewer(&reviewer).await.unwrap();

        let loaded = store.list_reviewers_with_teachers().await.unwrap();
        assert_eq!(loaded[0].policy, ExecutionPolicy::Recurring("*/15 * * * *".into()));
        assert!(loaded[0].teachers.is_empty());
    }

    #[tokio::test]
    async fn test_exists_lookups() {
        let (store, teacher) = store_with_teacher().await;
        let id = store
            .insert_reviewer(&Reviewer::new(0, "C", ranges(), ExecutionPolicy::Immediate))
            .await
            .unwrap();

        assert!(store.reviewer_exists(id).await.unwrap());
        assert!(!store.reviewer_exists(id + 100).await.unwrap());
        assert!(store.teacher_exists(teacher).await.unwrap());
        assert!(!store.teacher_exists(teacher + 100).await.unwrap());
    }

    #[tokio::test]
    async fn test_assign_unassign() {
        let (store, teacher) = store_with_teacher().await;
        let id = store
            .insert_reviewer(&Reviewer::new(0, "D", ranges(), ExecutionPolicy::Immediate))
            .await
            .unwrap();

        store.assign_teachers(id, &[teacher, teacher]).await.unwrap();
        let loaded = store.list_reviewers_with_teachers().await.unwrap();
        assert_eq!(loaded[0].teachers.len(), 1);

        store.unassign_teachers(id, &[teacher]).await.unwrap();
        let loaded = store.list_reviewers_with_teachers().await.unwrap();
        assert!(loaded[0].teachers.is_empty());
    }

    #[tokio::test]
    async fn test_assign_unknown_teacher_fails() {
        let store = SqliteReviewStore::open_in_memory().unwrap();
        let id = store
            .insert_reviewer(&Reviewer::new(0, "E", ranges(), ExecutionPolicy::Immediate))
            .await
            .unwrap();
        let err = store.assign_teachers(id, &[404]).await.unwrap_err();
        assert!(matches!(err, GeneratorError::Storage(_)));
    }

    #[tokio::test]
    async fn test_delete_reviewer_cascades_assignments() {
        let (store, teacher) = store_with_teacher().await;
        let reviewer = Reviewer::new(0, "F", ranges(), ExecutionPolicy::Immediate).with_teachers([teacher]);
        let id = store.insert_reviewer(&reviewer).await.unwrap();

        assert!(store.delete_reviewer(id).await.unwrap());
        assert!(!store.delete_reviewer(id).await.unwrap());
        assert!(store.list_reviewers_with_teachers().await.unwrap().is_empty());

        let conn = store.conn().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM reviewer_teachers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_reviews_insert_and_filter() {
        let (store, teacher) = store_with_teacher().await;
        let other = store.insert_teacher("Alan", "Turing").await.unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let first = store.insert_review(&Review::new(1, teacher, 10, 30, 50, t0)).await.unwrap();
        let second = store.insert_review(&Review::new(1, teacher, 19, 39, 59, t1)).await.unwrap();
        store.insert_review(&Review::new(1, other, 11, 31, 51, t0)).await.unwrap();

        let all = store.list_reviews(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let for_teacher = store.list_reviews(Some(teacher)).await.unwrap();
        assert_eq!(for_teacher.len(), 2);
        assert_eq!(for_teacher[0].id, Some(second));
        assert_eq!(for_teacher[1].id, Some(first));
        assert_eq!(for_teacher[1].review_time, t0);
        assert_eq!(for_teacher[1].overall, 30.0);
    }

    #[tokio::test]
    async fn test_recurring_jobs_upsert_and_delete() {
        let store = SqliteReviewStore::open_in_memory().unwrap();
        store.save_recurring_job("3", 3, "0 * * * *").await.unwrap();
        store.save_recurring_job("3", 3, "*/15 * * * *").await.unwrap();
        store.save_recurring_job("4", 4, "0 8 * * *").await.unwrap();

        let jobs = store.list_recurring_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].cron, "*/15 * * * *");

        store.delete_recurring_job("3").await.unwrap();
        store.delete_recurring_job("3").await.unwrap();
        let jobs = store.list_recurring_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "4");
    }

    #[tokio::test]
    async fn test_open_file_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("revgen.db");
        {
            let store = SqliteReviewStore::open(&path).unwrap();
            store.insert_teacher("Ada", "Lovelace").await.unwrap();
        }
        let store = SqliteReviewStore::open(&path).unwrap();
        let teachers = store.list_teachers().await.unwrap();
        assert_eq!(teachers.len(), 1);
        assert_eq!(teachers[0].full_name(), "Ada Lovelace");
    }
}
