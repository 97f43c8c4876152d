//! View types for the HTTP API boundary
//!
//! These types use camelCase serialization for the mobile client; ts-rs
//! generates matching TypeScript (`cargo test export_bindings`).
//!
//! Pattern:
//! - Services return report types (`LessonReport`, `ChapterReport`, ...)
//! - The HTTP layer converts them to views here
//! - `RewardSummary` is the exception: it is stored verbatim on the
//!   completion receipt so an idempotent replay returns identical bytes.
//!
//! InputView types (suffix InputView) accept camelCase request bodies.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::clock::format_timestamp;
use crate::db::DbStats;
use crate::engine::leveling::LevelProgress;
use crate::engine::{AttemptMode, CardUnlockCondition, LessonStatus};
use crate::services::progress_service::{
    CardCollectionEntry, ChapterReport, LessonReport, ProgressSummary, WorldReport,
};
use crate::services::completion_service::StartOutcome;

// ============================================================================
// Reward Summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StreakView {
    pub current: u32,
    pub longest: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DailyGoalView {
    pub target: u32,
    pub current: u32,
    /// Percent of target, capped at 100
    pub progress: u32,
}

/// Result of one lesson completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RewardSummary {
    pub lesson_id: String,
    pub attempt_mode: AttemptMode,
    pub xp_earned: u32,
    pub total_xp: i64,
    pub first_completion: bool,
    pub best_score: u8,
    pub mastery_level: u32,
    /// Card IDs first unlocked by this completion
    pub unlocked_cards: Vec<String>,
    pub streak: StreakView,
    pub daily_goal: DailyGoalView,
}

impl RewardSummary {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

// ============================================================================
// Progress Summary
// ============================================================================

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct HeartsView {
    pub current: u32,
    pub max: u32,
    /// When the next heart regenerates; absent at full hearts
    pub next_heart_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProgressSummaryView {
    #[serde(rename = "totalXP")]
    pub total_xp: i64,
    pub level: u32,
    pub level_progress: LevelProgress,
    pub streak: StreakView,
    pub daily_goal: DailyGoalView,
    pub hearts: HeartsView,
    pub completed_lessons: i64,
}

impl From<ProgressSummary> for ProgressSummaryView {
    fn from(s: ProgressSummary) -> Self {
        Self {
            total_xp: s.total_xp,
            level: s.level.level,
            level_progress: s.level,
            streak: StreakView {
                current: s.streak_current,
                longest: s.streak_longest,
            },
            daily_goal: DailyGoalView {
                target: s.daily_goal_target,
                current: s.daily_goal_current,
                progress: s.daily_goal_percent,
            },
            hearts: HeartsView {
                current: s.hearts_current,
                max: s.hearts_max,
                next_heart_at: s.next_heart_at.map(format_timestamp),
            },
            completed_lessons: s.completed_lessons,
        }
    }
}

// ============================================================================
// Lesson / Chapter / World Views
// ============================================================================

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LessonStatusView {
    pub lesson_id: String,
    pub chapter_id: String,
    pub title: String,
    pub order_index: i32,
    pub xp_reward: u32,
    pub status: LessonStatus,
    pub best_score: u8,
    pub mastery_level: u32,
}

impl From<LessonReport> for LessonStatusView {
    fn from(r: LessonReport) -> Self {
        Self {
            lesson_id: r.lesson.id,
            chapter_id: r.lesson.chapter_id,
            title: r.lesson.title,
            order_index: r.lesson.order_index,
            xp_reward: r.lesson.xp_reward,
            status: r.status,
            best_score: r.best_score,
            mastery_level: r.mastery_level,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChapterLessonsView {
    pub chapter_id: String,
    pub world_id: String,
    pub title: String,
    pub unlocked: bool,
    pub completed: bool,
    pub lessons: Vec<LessonStatusView>,
}

impl From<ChapterReport> for ChapterLessonsView {
    fn from(r: ChapterReport) -> Self {
        Self {
            chapter_id: r.chapter.id,
            world_id: r.chapter.world_id,
            title: r.chapter.title,
            unlocked: r.unlocked,
            completed: r.completed,
            lessons: r.lessons.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ChapterOverviewView {
    pub chapter_id: String,
    pub title: String,
    pub order_index: i32,
    pub unlocked: bool,
    pub completed: bool,
    pub completed_lessons: usize,
    pub total_lessons: usize,
    pub current_lesson_id: Option<String>,
}

impl From<ChapterReport> for ChapterOverviewView {
    fn from(r: ChapterReport) -> Self {
        let completed_lessons = r
            .lessons
            .iter()
            .filter(|l| l.status == LessonStatus::Completed)
            .count();
        let current_lesson_id = r
            .lessons
            .iter()
            .find(|l| l.status == LessonStatus::Current)
            .map(|l| l.lesson.id.clone());
        Self {
            total_lessons: r.lessons.len(),
            chapter_id: r.chapter.id,
            title: r.chapter.title,
            order_index: r.chapter.order_index,
            unlocked: r.unlocked,
            completed: r.completed,
            completed_lessons,
            current_lesson_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct WorldOverviewView {
    pub world_id: String,
    pub title: String,
    pub order_index: i32,
    pub chapters: Vec<ChapterOverviewView>,
}

impl From<WorldReport> for WorldOverviewView {
    fn from(r: WorldReport) -> Self {
        Self {
            world_id: r.world.id,
            title: r.world.title,
            order_index: r.world.order_index,
            chapters: r.chapters.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Card Views
// ============================================================================

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CardView {
    pub card_id: String,
    pub title: String,
    pub description: String,
    pub unlock_condition: CardUnlockCondition,
    pub unlocked: bool,
    pub unlocked_at: Option<String>,
}

impl From<CardCollectionEntry> for CardView {
    fn from(e: CardCollectionEntry) -> Self {
        Self {
            card_id: e.card.id,
            title: e.card.title,
            description: e.card.description,
            unlock_condition: e.card.unlock_condition,
            unlocked: e.unlocked_at.is_some(),
            unlocked_at: e.unlocked_at,
        }
    }
}

// ============================================================================
// Misc Responses
// ============================================================================

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct StartLessonView {
    pub lesson_id: String,
    pub outcome: StartOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthView {
    pub status: &'static str,
    pub version: &'static str,
    pub stats: DbStats,
    pub cached_chapters: usize,
}

// ============================================================================
// Input Views
// ============================================================================

/// Body of `POST /lessons/{id}/complete`
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CompleteLessonInputView {
    /// Must match the path parameter when present
    #[serde(default)]
    pub lesson_id: Option<String>,
    pub score: i32,
    pub correct_count: i32,
    pub total_questions: i32,
    #[serde(default)]
    pub review: bool,
    #[serde(default)]
    pub legendary: bool,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Body of `PUT /daily-goal`
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct SetDailyGoalInputView {
    #[serde(rename = "targetXP", alias = "targetXp")]
    pub target_xp: u32,
}
