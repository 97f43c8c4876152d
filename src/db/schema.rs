//! Database schema bootstrap
//!
//! The DDL here and the `table!` definitions in `diesel_schema.rs` must
//! describe the same columns.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::sqlite::SqliteConnection;
use tracing::info;

use crate::error::ProgressError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Create or migrate the ledger schema
pub fn init_schema(conn: &mut SqliteConnection) -> Result<(), ProgressError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, ProgressError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| {
            ProgressError::Internal(format!("Failed to create schema_version table: {}", e))
        })?;

    let row = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .get_result::<VersionRow>(conn)
        .optional()?;

    Ok(row.map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), ProgressError> {
    conn.batch_execute(&format!(
        "DELETE FROM schema_version; INSERT INTO schema_version (version) VALUES ({});",
        version
    ))
    .map_err(|e| ProgressError::Internal(format!("Failed to set schema_version: {}", e)))
}

fn create_tables(conn: &mut SqliteConnection) -> Result<(), ProgressError> {
    conn.batch_execute(CONTENT_SCHEMA)
        .map_err(|e| ProgressError::Internal(format!("Failed to create content tables: {}", e)))?;

    conn.batch_execute(LEDGER_SCHEMA)
        .map_err(|e| ProgressError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.batch_execute(CARDS_SCHEMA)
        .map_err(|e| ProgressError::Internal(format!("Failed to create card tables: {}", e)))?;

    conn.batch_execute(INDEXES_SCHEMA)
        .map_err(|e| ProgressError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// World -> Chapter -> Lesson
const CONTENT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS worlds (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (order_index)
);

CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY NOT NULL,
    world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (world_id, order_index)
);

CREATE TABLE IF NOT EXISTS lessons (
    id TEXT PRIMARY KEY NOT NULL,
    chapter_id TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    order_index INTEGER NOT NULL,
    xp_reward INTEGER NOT NULL CHECK (xp_reward >= 0),
    created_at TEXT NOT NULL,
    UNIQUE (chapter_id, order_index)
);
"#;

/// Progress and gamification ledgers
///
/// Attempts reference lessons by ID only: content may be re-imported while
/// attempts are never deleted.
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lesson_attempts (
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('not_started', 'in_progress', 'completed')),
    best_score INTEGER NOT NULL DEFAULT 0 CHECK (best_score BETWEEN 0 AND 100),
    mastery_level INTEGER NOT NULL DEFAULT 0 CHECK (mastery_level >= 0),
    started_at TEXT NOT NULL,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (user_id, lesson_id)
);

CREATE TABLE IF NOT EXISTS gamification_profiles (
    user_id TEXT PRIMARY KEY NOT NULL,
    total_xp INTEGER NOT NULL DEFAULT 0 CHECK (total_xp >= 0),
    hearts INTEGER NOT NULL CHECK (hearts >= 0),
    hearts_updated_at TEXT NOT NULL,
    streak_current INTEGER NOT NULL DEFAULT 0,
    streak_longest INTEGER NOT NULL DEFAULT 0,
    streak_last_active TEXT,
    daily_goal_xp INTEGER NOT NULL,
    daily_xp_today INTEGER NOT NULL DEFAULT 0,
    daily_goal_date TEXT,
    utc_offset_minutes INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS completion_receipts (
    user_id TEXT NOT NULL,
    idempotency_key TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    attempt_mode TEXT NOT NULL,
    summary_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, idempotency_key)
);
"#;

/// Card catalogue, unlocks and the post-commit evaluation outbox
const CARDS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS card_definitions (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    unlock_condition_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_card_unlocks (
    user_id TEXT NOT NULL,
    card_id TEXT NOT NULL,
    unlocked_at TEXT NOT NULL,
    source_lesson_id TEXT,
    PRIMARY KEY (user_id, card_id)
);

CREATE TABLE IF NOT EXISTS card_evaluation_jobs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    lesson_id TEXT NOT NULL,
    score INTEGER NOT NULL,
    total_xp INTEGER NOT NULL,
    streak_current INTEGER NOT NULL,
    completed_count INTEGER NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    next_attempt_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    idempotency_key TEXT
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chapters_world ON chapters(world_id, order_index);
CREATE INDEX IF NOT EXISTS idx_lessons_chapter ON lessons(chapter_id, order_index);
CREATE INDEX IF NOT EXISTS idx_attempts_user_status ON lesson_attempts(user_id, status);
CREATE INDEX IF NOT EXISTS idx_card_jobs_due ON card_evaluation_jobs(next_attempt_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        init_schema(&mut conn).unwrap();
        init_schema(&mut conn).unwrap();
        assert_eq!(get_schema_version(&mut conn).unwrap(), SCHEMA_VERSION);
    }
}
