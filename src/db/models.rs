//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)
//!
//! Timestamps are ISO 8601 TEXT, dates are `YYYY-MM-DD` TEXT in the user's
//! local calendar.

use diesel::prelude::*;

use super::diesel_schema::*;

// ============================================================================
// Content Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = worlds)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorldRow {
    pub id: String,
    pub title: String,
    pub order_index: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = worlds)]
pub struct NewWorld<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub order_index: i32,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = chapters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ChapterRow {
    pub id: String,
    pub world_id: String,
    pub title: String,
    pub order_index: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = chapters)]
pub struct NewChapter<'a> {
    pub id: &'a str,
    pub world_id: &'a str,
    pub title: &'a str,
    pub order_index: i32,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = lessons)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LessonRow {
    pub id: String,
    pub chapter_id: String,
    pub title: String,
    pub order_index: i32,
    pub xp_reward: i32,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lessons)]
pub struct NewLesson<'a> {
    pub id: &'a str,
    pub chapter_id: &'a str,
    pub title: &'a str,
    pub order_index: i32,
    pub xp_reward: i32,
    pub created_at: &'a str,
}

// ============================================================================
// Progress Ledger Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = lesson_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LessonAttemptRow {
    pub user_id: String,
    pub lesson_id: String,
    pub status: String,
    pub best_score: i32,
    pub mastery_level: i32,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lesson_attempts)]
pub struct NewLessonAttempt<'a> {
    pub user_id: &'a str,
    pub lesson_id: &'a str,
    pub status: &'a str,
    pub best_score: i32,
    pub mastery_level: i32,
    pub started_at: &'a str,
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
    pub version: i64,
}

/// Mutable columns of an attempt; `version` is bumped by the caller
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = lesson_attempts)]
#[diesel(treat_none_as_null = true)]
pub struct LessonAttemptChanges<'a> {
    pub status: &'a str,
    pub best_score: i32,
    pub mastery_level: i32,
    pub completed_at: Option<&'a str>,
    pub updated_at: &'a str,
    pub version: i64,
}

// ============================================================================
// Gamification Ledger Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = gamification_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProfileRow {
    pub user_id: String,
    pub total_xp: i64,
    pub hearts: i32,
    pub hearts_updated_at: String,
    pub streak_current: i32,
    pub streak_longest: i32,
    pub streak_last_active: Option<String>,
    pub daily_goal_xp: i32,
    pub daily_xp_today: i32,
    pub daily_goal_date: Option<String>,
    pub utc_offset_minutes: i32,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = gamification_profiles)]
pub struct NewProfile {
    pub user_id: String,
    pub total_xp: i64,
    pub hearts: i32,
    pub hearts_updated_at: String,
    pub streak_current: i32,
    pub streak_longest: i32,
    pub streak_last_active: Option<String>,
    pub daily_goal_xp: i32,
    pub daily_xp_today: i32,
    pub daily_goal_date: Option<String>,
    pub utc_offset_minutes: i32,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = gamification_profiles)]
#[diesel(treat_none_as_null = true)]
pub struct ProfileChanges {
    pub total_xp: i64,
    pub hearts: i32,
    pub hearts_updated_at: String,
    pub streak_current: i32,
    pub streak_longest: i32,
    pub streak_last_active: Option<String>,
    pub daily_goal_xp: i32,
    pub daily_xp_today: i32,
    pub daily_goal_date: Option<String>,
    pub utc_offset_minutes: i32,
    pub updated_at: String,
    pub version: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = completion_receipts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CompletionReceiptRow {
    pub user_id: String,
    pub idempotency_key: String,
    pub lesson_id: String,
    pub attempt_mode: String,
    pub summary_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = completion_receipts)]
pub struct NewCompletionReceipt<'a> {
    pub user_id: &'a str,
    pub idempotency_key: &'a str,
    pub lesson_id: &'a str,
    pub attempt_mode: &'a str,
    pub summary_json: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Card Models
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = card_definitions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CardDefinitionRow {
    pub id: String,
    pub title: String,
    pub description: String,
    pub unlock_condition_json: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = card_definitions)]
pub struct NewCardDefinition<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub unlock_condition_json: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = user_card_unlocks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserCardUnlockRow {
    pub user_id: String,
    pub card_id: String,
    pub unlocked_at: String,
    pub source_lesson_id: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = user_card_unlocks)]
pub struct NewUserCardUnlock<'a> {
    pub user_id: &'a str,
    pub card_id: &'a str,
    pub unlocked_at: &'a str,
    pub source_lesson_id: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = card_evaluation_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CardJobRow {
    pub id: String,
    pub user_id: String,
    pub lesson_id: String,
    pub score: i32,
    pub total_xp: i64,
    pub streak_current: i32,
    pub completed_count: i64,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: String,
    pub created_at: String,
    /// Receipt to fold the unlocked cards into
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = card_evaluation_jobs)]
pub struct NewCardJob<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub lesson_id: &'a str,
    pub score: i32,
    pub total_xp: i64,
    pub streak_current: i32,
    pub completed_count: i64,
    pub attempts: i32,
    pub next_attempt_at: &'a str,
    pub created_at: &'a str,
    pub idempotency_key: Option<&'a str>,
}
