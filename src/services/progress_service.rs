//! Progress service - read API over the ledgers
//!
//! Nothing here writes. Lesson statuses are folded from committed attempts
//! on every call; hearts regeneration and the effective streak are computed
//! on read without touching the stored profile.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::{local_date, Clock};
use crate::config::RewardConfig;
use crate::content::{ChapterNode, ContentGraph, ContentGraphExt, LessonNode, WorldNode};
use crate::db::lesson_attempts::{self, LessonAttempt};
use crate::db::{cards, profiles, ProgressDb, UserContext};
use crate::engine::leveling::LevelProgress;
use crate::engine::unlock::{chapter_scope, ordered_lessons};
use crate::engine::{
    CardDefinition, ChapterGate, GamificationProfile, LessonStatus, LevelCurve, ProgressSnapshot,
    UnlockEvaluator,
};
use crate::error::ProgressError;

#[derive(Debug, Clone)]
pub struct LessonReport {
    pub lesson: LessonNode,
    pub status: LessonStatus,
    pub best_score: u8,
    pub mastery_level: u32,
}

#[derive(Debug, Clone)]
pub struct ChapterReport {
    pub chapter: ChapterNode,
    pub unlocked: bool,
    pub completed: bool,
    pub lessons: Vec<LessonReport>,
}

#[derive(Debug, Clone)]
pub struct WorldReport {
    pub world: WorldNode,
    pub chapters: Vec<ChapterReport>,
}

#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub total_xp: i64,
    pub level: LevelProgress,
    /// Zero once a full day was missed
    pub streak_current: u32,
    pub streak_longest: u32,
    pub daily_goal_target: u32,
    pub daily_goal_current: u32,
    pub daily_goal_percent: u32,
    pub hearts_current: u32,
    pub hearts_max: u32,
    pub next_heart_at: Option<DateTime<Utc>>,
    pub completed_lessons: i64,
}

#[derive(Debug, Clone)]
pub struct CardCollectionEntry {
    pub card: CardDefinition,
    pub unlocked_at: Option<String>,
}

pub struct ProgressService {
    db: Arc<ProgressDb>,
    graph: Arc<dyn ContentGraph>,
    clock: Arc<dyn Clock>,
    rewards: RewardConfig,
    curve: Arc<dyn LevelCurve>,
}

/// Content for one chapter, loaded before touching the ledger
struct ChapterScope {
    chapter: ChapterNode,
    gate: ChapterGate,
    lessons: Vec<LessonNode>,
}

impl ChapterScope {
    fn load(graph: &dyn ContentGraph, chapter_id: &str) -> Result<Self, ProgressError> {
        let (chapter, gate, lessons) = chapter_scope(graph, chapter_id)?;
        Ok(Self {
            chapter,
            gate,
            lessons: ordered_lessons(&lessons),
        })
    }

    fn lesson_ids(&self) -> Vec<String> {
        let mut ids = self.gate.lesson_ids();
        ids.extend(self.lessons.iter().map(|l| l.id.clone()));
        ids
    }

    fn report(
        self,
        snapshot: &ProgressSnapshot,
        attempts: &HashMap<String, LessonAttempt>,
    ) -> ChapterReport {
        let evaluator = UnlockEvaluator::new(snapshot);
        let statuses = evaluator.statuses_for_chapter(&self.gate, &self.lessons);
        let lessons = self
            .lessons
            .into_iter()
            .map(|lesson| {
                let attempt = attempts.get(&lesson.id);
                LessonReport {
                    status: statuses.get(&lesson.id).unwrap_or(LessonStatus::Locked),
                    best_score: attempt.map(|a| a.best_score).unwrap_or(0),
                    mastery_level: attempt.map(|a| a.mastery_level).unwrap_or(0),
                    lesson,
                }
            })
            .collect::<Vec<_>>();
        ChapterReport {
            unlocked: evaluator.is_chapter_unlocked(&self.gate),
            completed: lessons.iter().all(|l| l.status == LessonStatus::Completed),
            chapter: self.chapter,
            lessons,
        }
    }
}

fn snapshot_of(attempts: &[LessonAttempt]) -> ProgressSnapshot {
    ProgressSnapshot::from_pairs(attempts.iter().map(|a| (a.lesson_id.clone(), a.status)))
}

impl ProgressService {
    pub fn new(
        db: Arc<ProgressDb>,
        graph: Arc<dyn ContentGraph>,
        clock: Arc<dyn Clock>,
        rewards: RewardConfig,
        curve: Arc<dyn LevelCurve>,
    ) -> Self {
        Self {
            db,
            graph,
            clock,
            rewards,
            curve,
        }
    }

    /// Status of one lesson for the user
    pub fn lesson_status(
        &self,
        ctx: &UserContext,
        lesson_id: &str,
    ) -> Result<LessonReport, ProgressError> {
        let lesson = self.graph.require_lesson(lesson_id)?;
        let scope = ChapterScope::load(self.graph.as_ref(), &lesson.chapter_id)?;
        let ids = scope.lesson_ids();

        let attempts = self
            .db
            .with_conn(|conn| lesson_attempts::list_for_lessons(conn, ctx.user_id(), &ids))?;
        let snapshot = snapshot_of(&attempts);
        let status = UnlockEvaluator::new(&snapshot)
            .status(&scope.gate, &scope.lessons, lesson_id)
            .unwrap_or(LessonStatus::Locked);
        let attempt = attempts.iter().find(|a| a.lesson_id == lesson_id);

        Ok(LessonReport {
            status,
            best_score: attempt.map(|a| a.best_score).unwrap_or(0),
            mastery_level: attempt.map(|a| a.mastery_level).unwrap_or(0),
            lesson,
        })
    }

    /// Every lesson of a chapter with its computed status
    pub fn chapter_statuses(
        &self,
        ctx: &UserContext,
        chapter_id: &str,
    ) -> Result<ChapterReport, ProgressError> {
        let scope = ChapterScope::load(self.graph.as_ref(), chapter_id)?;
        let ids = scope.lesson_ids();
        let attempts = self
            .db
            .with_conn(|conn| lesson_attempts::list_for_lessons(conn, ctx.user_id(), &ids))?;
        let snapshot = snapshot_of(&attempts);
        let by_lesson = attempts
            .into_iter()
            .map(|a| (a.lesson_id.clone(), a))
            .collect::<HashMap<_, _>>();
        Ok(scope.report(&snapshot, &by_lesson))
    }

    /// Per-chapter unlocked/completed flags for one world
    pub fn world_overview(
        &self,
        ctx: &UserContext,
        world_id: &str,
    ) -> Result<WorldReport, ProgressError> {
        let world = self.graph.require_world(world_id)?;
        let scopes = self
            .graph
            .get_world_chapters(world_id)?
            .iter()
            .map(|c| ChapterScope::load(self.graph.as_ref(), &c.id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ids: Vec<String> = scopes.iter().flat_map(|s| s.lesson_ids()).collect();
        ids.sort();
        ids.dedup();

        let attempts = self
            .db
            .with_conn(|conn| lesson_attempts::list_for_lessons(conn, ctx.user_id(), &ids))?;
        let snapshot = snapshot_of(&attempts);
        let by_lesson = attempts
            .into_iter()
            .map(|a| (a.lesson_id.clone(), a))
            .collect::<HashMap<_, _>>();

        Ok(WorldReport {
            world,
            chapters: scopes
                .into_iter()
                .map(|s| s.report(&snapshot, &by_lesson))
                .collect(),
        })
    }

    /// XP, level, streak, daily goal and hearts
    pub fn summary(&self, ctx: &UserContext) -> Result<ProgressSummary, ProgressError> {
        let now = self.clock.now();
        let (profile, completed_lessons) = self.db.with_conn(|conn| {
            let profile = profiles::get_or_new(conn, ctx.user_id(), &self.rewards, now)?;
            let completed = lesson_attempts::count_completed(conn, ctx.user_id())?;
            Ok((profile, completed))
        })?;
        Ok(self.summarize(ctx, profile, completed_lessons, now))
    }

    fn summarize(
        &self,
        ctx: &UserContext,
        mut profile: GamificationProfile,
        completed_lessons: i64,
        now: DateTime<Utc>,
    ) -> ProgressSummary {
        let offset = ctx.utc_offset_minutes.unwrap_or(profile.utc_offset_minutes);
        let today = local_date(now, offset);

        let max = self.rewards.max_hearts;
        let regen = self.rewards.heart_regen_minutes;
        profile.hearts.regenerate(max, regen, now);

        ProgressSummary {
            total_xp: profile.total_xp,
            level: self.curve.progress(profile.total_xp),
            streak_current: profile.streak.effective_current(today),
            streak_longest: profile.streak.longest,
            daily_goal_target: profile.daily_goal.target_xp,
            daily_goal_current: profile.daily_goal.xp_on(today),
            daily_goal_percent: profile.daily_goal.progress_percent(today),
            hearts_current: profile.hearts.current,
            hearts_max: max,
            next_heart_at: profile.hearts.next_heart_at(max, regen),
            completed_lessons,
        }
    }

    /// Every card definition with the user's unlock time when present
    pub fn card_collection(
        &self,
        ctx: &UserContext,
    ) -> Result<Vec<CardCollectionEntry>, ProgressError> {
        self.db.with_conn(|conn| {
            let definitions = cards::list_definitions(conn)?;
            let unlocked = cards::list_unlocks(conn, ctx.user_id())?
                .into_iter()
                .map(|u| (u.card_id, u.unlocked_at))
                .collect::<HashMap<_, _>>();
            Ok(definitions
                .into_iter()
                .map(|card| CardCollectionEntry {
                    unlocked_at: unlocked.get(&card.id).cloned(),
                    card,
                })
                .collect())
        })
    }
}
