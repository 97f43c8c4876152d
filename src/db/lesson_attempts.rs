//! Progress ledger: one attempt record per (user, lesson)
//!
//! Records are created lazily on first start (or first completion), updated
//! with an optimistic `version` check and never deleted.

use diesel::prelude::*;

use super::diesel_schema::lesson_attempts;
use super::models::{LessonAttemptChanges, LessonAttemptRow, NewLessonAttempt};
use crate::engine::{AttemptStatus, ProgressSnapshot};
use crate::error::ProgressError;

/// Attempt record as the services see it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonAttempt {
    pub user_id: String,
    pub lesson_id: String,
    pub status: AttemptStatus,
    pub best_score: u8,
    pub mastery_level: u32,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub version: i64,
}

impl TryFrom<LessonAttemptRow> for LessonAttempt {
    type Error = ProgressError;

    fn try_from(row: LessonAttemptRow) -> Result<Self, Self::Error> {
        Ok(LessonAttempt {
            status: AttemptStatus::parse(&row.status)?,
            best_score: row.best_score.clamp(0, 100) as u8,
            mastery_level: u32::try_from(row.mastery_level).unwrap_or(0),
            user_id: row.user_id,
            lesson_id: row.lesson_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
            version: row.version,
        })
    }
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_attempt(
    conn: &mut SqliteConnection,
    user_id: &str,
    lesson_id: &str,
) -> Result<Option<LessonAttempt>, ProgressError> {
    lesson_attempts::table
        .filter(lesson_attempts::user_id.eq(user_id))
        .filter(lesson_attempts::lesson_id.eq(lesson_id))
        .select(LessonAttemptRow::as_select())
        .first::<LessonAttemptRow>(conn)
        .optional()?
        .map(LessonAttempt::try_from)
        .transpose()
}

/// Attempts for a set of lessons (missing lessons have no record)
pub fn list_for_lessons(
    conn: &mut SqliteConnection,
    user_id: &str,
    lesson_ids: &[String],
) -> Result<Vec<LessonAttempt>, ProgressError> {
    if lesson_ids.is_empty() {
        return Ok(Vec::new());
    }
    lesson_attempts::table
        .filter(lesson_attempts::user_id.eq(user_id))
        .filter(lesson_attempts::lesson_id.eq_any(lesson_ids))
        .select(LessonAttemptRow::as_select())
        .load::<LessonAttemptRow>(conn)?
        .into_iter()
        .map(LessonAttempt::try_from)
        .collect()
}

/// Snapshot restricted to `lesson_ids` (e.g. a chapter and its gate)
pub fn snapshot_for_lessons(
    conn: &mut SqliteConnection,
    user_id: &str,
    lesson_ids: &[String],
) -> Result<ProgressSnapshot, ProgressError> {
    let mut snapshot = ProgressSnapshot::new();
    if lesson_ids.is_empty() {
        return Ok(snapshot);
    }
    let rows: Vec<(String, String)> = lesson_attempts::table
        .filter(lesson_attempts::user_id.eq(user_id))
        .filter(lesson_attempts::lesson_id.eq_any(lesson_ids))
        .select((lesson_attempts::lesson_id, lesson_attempts::status))
        .load(conn)?;
    for (lesson_id, status) in rows {
        snapshot.insert(lesson_id, AttemptStatus::parse(&status)?);
    }
    Ok(snapshot)
}

/// Snapshot of every attempt the user has
pub fn snapshot_for_user(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<ProgressSnapshot, ProgressError> {
    let rows: Vec<(String, String)> = lesson_attempts::table
        .filter(lesson_attempts::user_id.eq(user_id))
        .select((lesson_attempts::lesson_id, lesson_attempts::status))
        .load(conn)?;
    let mut snapshot = ProgressSnapshot::new();
    for (lesson_id, status) in rows {
        snapshot.insert(lesson_id, AttemptStatus::parse(&status)?);
    }
    Ok(snapshot)
}

pub fn count_completed(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, ProgressError> {
    Ok(lesson_attempts::table
        .filter(lesson_attempts::user_id.eq(user_id))
        .filter(lesson_attempts::status.eq(AttemptStatus::Completed.as_str()))
        .count()
        .get_result(conn)?)
}

// ============================================================================
// Write Operations
// ============================================================================

pub fn insert_attempt(
    conn: &mut SqliteConnection,
    attempt: &LessonAttempt,
) -> Result<(), ProgressError> {
    diesel::insert_into(lesson_attempts::table)
        .values(&NewLessonAttempt {
            user_id: &attempt.user_id,
            lesson_id: &attempt.lesson_id,
            status: attempt.status.as_str(),
            best_score: i32::from(attempt.best_score),
            mastery_level: attempt.mastery_level as i32,
            started_at: &attempt.started_at,
            completed_at: attempt.completed_at.as_deref(),
            updated_at: &attempt.updated_at,
            version: 1,
        })
        .execute(conn)?;
    Ok(())
}

/// Write `attempt` if the stored version still equals `attempt.version`
///
/// Returns the new version, or `Conflict` when another writer got there first.
pub fn update_attempt(
    conn: &mut SqliteConnection,
    attempt: &LessonAttempt,
) -> Result<i64, ProgressError> {
    let next_version = attempt.version + 1;
    let updated = diesel::update(
        lesson_attempts::table
            .filter(lesson_attempts::user_id.eq(&attempt.user_id))
            .filter(lesson_attempts::lesson_id.eq(&attempt.lesson_id))
            .filter(lesson_attempts::version.eq(attempt.version)),
    )
    .set(&LessonAttemptChanges {
        status: attempt.status.as_str(),
        best_score: i32::from(attempt.best_score),
        mastery_level: attempt.mastery_level as i32,
        completed_at: attempt.completed_at.as_deref(),
        updated_at: &attempt.updated_at,
        version: next_version,
    })
    .execute(conn)?;

    if updated == 0 {
        return Err(ProgressError::Conflict(format!(
            "attempt {}/{} changed since version {}",
            attempt.user_id, attempt.lesson_id, attempt.version
        )));
    }
    Ok(next_version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProgressDb;

    fn attempt(lesson_id: &str, status: AttemptStatus) -> LessonAttempt {
        LessonAttempt {
            user_id: "u1".into(),
            lesson_id: lesson_id.into(),
            status,
            best_score: 0,
            mastery_level: 0,
            started_at: "2024-01-01T00:00:00Z".into(),
            completed_at: None,
            updated_at: "2024-01-01T00:00:00Z".into(),
            version: 1,
        }
    }

    #[test]
    fn test_insert_and_snapshot() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_attempt(conn, &attempt("l1", AttemptStatus::Completed))?;
            insert_attempt(conn, &attempt("l2", AttemptStatus::InProgress))?;

            let snapshot = snapshot_for_lessons(conn, "u1", &["l1".into(), "l3".into()])?;
            assert!(snapshot.is_completed("l1"));
            assert_eq!(snapshot.status_of("l2"), AttemptStatus::NotStarted);
            assert_eq!(snapshot.status_of("l3"), AttemptStatus::NotStarted);

            assert_eq!(snapshot_for_user(conn, "u1")?.status_of("l2"), AttemptStatus::InProgress);
            assert_eq!(count_completed(conn, "u1")?, 1);
            assert_eq!(count_completed(conn, "someone-else")?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_stale_version_conflicts() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_attempt(conn, &attempt("l1", AttemptStatus::InProgress))?;

            let mut fresh = get_attempt(conn, "u1", "l1")?.unwrap();
            let stale = fresh.clone();
            fresh.status = AttemptStatus::Completed;
            fresh.best_score = 90;
            assert_eq!(update_attempt(conn, &fresh)?, 2);

            let err = update_attempt(conn, &stale).unwrap_err();
            assert!(err.is_retryable());

            let stored = get_attempt(conn, "u1", "l1")?.unwrap();
            assert_eq!(stored.status, AttemptStatus::Completed);
            assert_eq!(stored.best_score, 90);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_duplicate_insert_is_unique_violation() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_attempt(conn, &attempt("l1", AttemptStatus::InProgress))?;
            let err = insert_attempt(conn, &attempt("l1", AttemptStatus::InProgress)).unwrap_err();
            assert!(err.is_retryable());
            Ok(())
        })
        .unwrap();
    }
}
