//! Error types for sangha-progress
//!
//! Variants follow the engine's error taxonomy:
//! - validation class (`InvalidInput`, `AlreadyCompleted`, `Locked`) - rejected
//!   synchronously, no state change
//! - `NotFound` - content graph lookup miss (content may have been removed
//!   while a client still holds the ID)
//! - `Conflict` - write conflict that survived the retry policy; retryable
//! - `SideEffect` - post-commit work (card evaluation) failed; never surfaced
//!   as a failure of the completion itself

use diesel::result::{DatabaseErrorInformation, DatabaseErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Lesson {lesson_id} is already completed for user {user_id}")]
    AlreadyCompleted { user_id: String, lesson_id: String },

    #[error("Lesson {0} is locked")]
    Locked(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Write conflict: {0}")]
    Conflict(String),

    #[error("Side effect failed: {0}")]
    SideEffect(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProgressError {
    /// Whether the caller may re-issue the same request (same idempotency key).
    ///
    /// SQLite reports lock contention as a generic database error carrying
    /// "database is locked" / "busy"; unique violations on ledger rows mean a
    /// concurrent writer created the row first.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProgressError::Conflict(_) => true,
            ProgressError::Database(e) => is_contention(e),
            _ => false,
        }
    }
}

fn is_contention(error: &diesel::result::Error) -> bool {
    match error {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => true,
        diesel::result::Error::DatabaseError(_, info) => {
            let message = info.message().to_ascii_lowercase();
            message.contains("database is locked") || message.contains("busy")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_retryable() {
        assert!(ProgressError::Conflict("version moved".into()).is_retryable());
        assert!(!ProgressError::InvalidInput("score".into()).is_retryable());
        assert!(!ProgressError::NotFound("lesson".into()).is_retryable());
    }

    #[test]
    fn test_not_found_is_plain_query_error() {
        let err = ProgressError::Database(diesel::result::Error::NotFound);
        assert!(!err.is_retryable());
    }
}
