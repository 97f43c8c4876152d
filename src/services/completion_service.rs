//! Completion service - the only writer of attempts and profiles
//!
//! Every mutation runs inside one `BEGIN IMMEDIATE` transaction wrapped in
//! the bounded [`RetryPolicy`]. Content lookups happen before the
//! transaction opens so a single-connection pool never waits on itself.
//!
//! `complete_lesson` writes the attempt, the XP/streak/daily-goal ledger,
//! the idempotency receipt and a card evaluation job together. Card
//! evaluation then runs after commit and records its unlocks on the receipt
//! in its own transaction; its failure is deferred to the retry worker and
//! never fails the completion.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use ts_rs::TS;

use crate::clock::{format_timestamp, local_date, Clock};
use crate::config::RewardConfig;
use crate::content::{ContentGraph, ContentGraphExt, LessonNode};
use crate::db::lesson_attempts::{self, LessonAttempt};
use crate::db::models::{NewCardJob, NewCompletionReceipt};
use crate::db::{card_jobs, profiles, receipts, ProgressDb, UserContext};
use crate::engine::attempt::next_mastery_level;
use crate::engine::ledger::xp_for_completion;
use crate::engine::unlock::chapter_scope;
use crate::engine::{
    AttemptMode, AttemptStatus, ChapterGate, GamificationProfile, LessonResult, LessonStatus,
    StreakChange, UnlockEvaluator,
};
use crate::error::ProgressError;
use crate::views::{DailyGoalView, RewardSummary, StreakView};

use super::card_service::CardService;
use super::events::{EventBus, ProgressEvent};
use super::retry::RetryPolicy;

/// Longest idempotency key accepted
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Result of `start_lesson`; every variant is a success for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StartOutcome {
    Started,
    AlreadyInProgress,
    AlreadyCompleted,
    /// Lesson is not reachable yet; nothing was written
    Locked,
    /// The start could not be recorded (unknown lesson, storage failure)
    Ignored,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub lesson_id: String,
    pub result: LessonResult,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub summary: RewardSummary,
    /// The summary came from a stored receipt; nothing was mutated
    pub replayed: bool,
}

/// What the ledger transaction hands to post-commit work
struct Committed {
    summary: RewardSummary,
    job_id: String,
    streak_change: StreakChange,
}

enum CompletionTx {
    Replayed(RewardSummary),
    Committed(Committed),
}

pub struct CompletionService {
    db: Arc<ProgressDb>,
    graph: Arc<dyn ContentGraph>,
    clock: Arc<dyn Clock>,
    rewards: RewardConfig,
    retry: RetryPolicy,
    cards: Arc<CardService>,
    events: Arc<EventBus>,
}

fn validate_key(key: Option<&str>) -> Result<(), ProgressError> {
    if let Some(key) = key {
        if key.trim().is_empty() {
            return Err(ProgressError::InvalidInput("idempotency key must not be blank".into()));
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ProgressError::InvalidInput(format!(
                "idempotency key longer than {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
    }
    Ok(())
}

/// Lesson status for `lesson_id` given committed progress in its chapter scope
fn gated_status(
    conn: &mut diesel::SqliteConnection,
    user_id: &str,
    gate: &ChapterGate,
    lessons: &[LessonNode],
    lesson_id: &str,
) -> Result<LessonStatus, ProgressError> {
    let mut ids = gate.lesson_ids();
    ids.extend(lessons.iter().map(|l| l.id.clone()));
    let snapshot = lesson_attempts::snapshot_for_lessons(conn, user_id, &ids)?;
    UnlockEvaluator::new(&snapshot)
        .status(gate, lessons, lesson_id)
        .ok_or_else(|| ProgressError::NotFound(format!("Lesson '{}' not found", lesson_id)))
}

impl CompletionService {
    pub fn new(
        db: Arc<ProgressDb>,
        graph: Arc<dyn ContentGraph>,
        clock: Arc<dyn Clock>,
        rewards: RewardConfig,
        retry: RetryPolicy,
        cards: Arc<CardService>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            db,
            graph,
            clock,
            rewards,
            retry,
            cards,
            events,
        }
    }

    pub fn rewards(&self) -> &RewardConfig {
        &self.rewards
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Move a reachable lesson from not started to in progress
    ///
    /// Idempotent: repeated calls and calls on completed or locked lessons
    /// change nothing.
    pub fn start_lesson(
        &self,
        ctx: &UserContext,
        lesson_id: &str,
    ) -> Result<StartOutcome, ProgressError> {
        let lesson = self.graph.require_lesson(lesson_id)?;
        let (_, gate, lessons) = chapter_scope(self.graph.as_ref(), &lesson.chapter_id)?;
        let now = format_timestamp(self.clock.now());
        let user_id = ctx.user_id();

        let outcome = self.retry.run("start_lesson", || {
            self.db.write_transaction(|conn| {
                let existing = lesson_attempts::get_attempt(conn, user_id, lesson_id)?;
                match existing.as_ref().map(|a| a.status) {
                    Some(AttemptStatus::Completed) => return Ok(StartOutcome::AlreadyCompleted),
                    Some(AttemptStatus::InProgress) => return Ok(StartOutcome::AlreadyInProgress),
                    _ => {}
                }

                if gated_status(conn, user_id, &gate, &lessons, lesson_id)? != LessonStatus::Current {
                    return Ok(StartOutcome::Locked);
                }

                match existing {
                    Some(mut attempt) => {
                        attempt.status = AttemptStatus::InProgress;
                        attempt.started_at = now.clone();
                        attempt.updated_at = now.clone();
                        lesson_attempts::update_attempt(conn, &attempt)?;
                    }
                    None => {
                        lesson_attempts::insert_attempt(
                            conn,
                            &LessonAttempt {
                                user_id: user_id.to_string(),
                                lesson_id: lesson_id.to_string(),
                                status: AttemptStatus::InProgress,
                                best_score: 0,
                                mastery_level: 0,
                                started_at: now.clone(),
                                completed_at: None,
                                updated_at: now.clone(),
                                version: 0,
                            },
                        )?;
                    }
                }
                Ok(StartOutcome::Started)
            })
        })?;

        match outcome {
            StartOutcome::Started => {
                self.events.emit(ProgressEvent::LessonStarted {
                    user_id: user_id.to_string(),
                    lesson_id: lesson_id.to_string(),
                });
            }
            StartOutcome::Locked => {
                debug!(user_id = %user_id, lesson_id = %lesson_id, "Start ignored for locked lesson");
            }
            _ => {}
        }
        Ok(outcome)
    }

    // ========================================================================
    // Complete
    // ========================================================================

    /// Record a finished lesson and credit its rewards
    pub fn complete_lesson(
        &self,
        ctx: &UserContext,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, ProgressError> {
        request.result.validate()?;
        validate_key(request.idempotency_key.as_deref())?;

        let lesson = self.graph.require_lesson(&request.lesson_id)?;
        let (_, gate, lessons) = chapter_scope(self.graph.as_ref(), &lesson.chapter_id)?;
        let now = self.clock.now();

        let tx = self.retry.run("complete_lesson", || {
            self.db.write_transaction(|conn| {
                self.completion_tx(conn, ctx, &request, &lesson, &gate, &lessons, now)
            })
        })?;

        let committed = match tx {
            CompletionTx::Replayed(summary) => {
                info!(
                    user_id = %ctx.user_id(),
                    lesson_id = %request.lesson_id,
                    "Completion replayed from receipt"
                );
                return Ok(CompletionOutcome {
                    summary,
                    replayed: true,
                });
            }
            CompletionTx::Committed(committed) => committed,
        };

        let mut summary = committed.summary;
        debug!(
            user_id = %ctx.user_id(),
            lesson_id = %summary.lesson_id,
            mode = summary.attempt_mode.as_str(),
            xp = summary.xp_earned,
            total_xp = summary.total_xp,
            "Completion committed"
        );
        self.events.emit(ProgressEvent::LessonCompleted {
            user_id: ctx.user_id().to_string(),
            lesson_id: summary.lesson_id.clone(),
            attempt_mode: summary.attempt_mode.as_str().to_string(),
            xp_earned: summary.xp_earned,
            first_completion: summary.first_completion,
        });
        if committed.streak_change.advanced() {
            self.events.emit(ProgressEvent::StreakAdvanced {
                user_id: ctx.user_id().to_string(),
                current: summary.streak.current,
                longest: summary.streak.longest,
            });
        }

        // Post-commit side effect
        match self.cards.evaluate_job(&committed.job_id) {
            Ok(unlocked) => summary.unlocked_cards = unlocked,
            Err(e) => {
                warn!(
                    user_id = %ctx.user_id(),
                    job_id = %committed.job_id,
                    error = %e,
                    "Card evaluation failed after commit, deferring"
                );
                self.cards.defer_job(&committed.job_id, ctx.user_id(), &e);
            }
        }

        Ok(CompletionOutcome {
            summary,
            replayed: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn completion_tx(
        &self,
        conn: &mut diesel::SqliteConnection,
        ctx: &UserContext,
        request: &CompletionRequest,
        lesson: &LessonNode,
        gate: &ChapterGate,
        lessons: &[LessonNode],
        now: DateTime<Utc>,
    ) -> Result<CompletionTx, ProgressError> {
        let user_id = ctx.user_id();
        let mode = request.result.mode;
        let now_text = format_timestamp(now);

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(receipt) = receipts::find_receipt(conn, user_id, key)? {
                if receipt.lesson_id != lesson.id {
                    return Err(ProgressError::InvalidInput(format!(
                        "idempotency key was already used for lesson {}",
                        receipt.lesson_id
                    )));
                }
                return Ok(CompletionTx::Replayed(RewardSummary::from_json(
                    &receipt.summary_json,
                )?));
            }
        }

        let existing = lesson_attempts::get_attempt(conn, user_id, &lesson.id)?;
        let already_completed = existing
            .as_ref()
            .map(|a| a.status.is_completed())
            .unwrap_or(false);

        if !already_completed
            && gated_status(conn, user_id, gate, lessons, &lesson.id)? != LessonStatus::Current
        {
            return Err(ProgressError::Locked(lesson.id.clone()));
        }
        if mode == AttemptMode::Normal && already_completed {
            return Err(ProgressError::AlreadyCompleted {
                user_id: user_id.to_string(),
                lesson_id: lesson.id.clone(),
            });
        }

        let xp = xp_for_completion(mode, lesson.xp_reward, already_completed, &self.rewards);
        let score = request.result.score_percent();

        // Attempt record
        let (best_score, mastery_level) = if mode == AttemptMode::Review && !already_completed {
            // Review of an unfinished lesson leaves the record alone
            existing
                .as_ref()
                .map(|a| (a.best_score, a.mastery_level))
                .unwrap_or((0, 0))
        } else {
            let mut attempt = existing.clone().unwrap_or_else(|| LessonAttempt {
                user_id: user_id.to_string(),
                lesson_id: lesson.id.clone(),
                status: AttemptStatus::NotStarted,
                best_score: 0,
                mastery_level: 0,
                started_at: now_text.clone(),
                completed_at: None,
                updated_at: now_text.clone(),
                version: 0,
            });
            attempt.best_score = attempt.best_score.max(score);
            attempt.mastery_level = next_mastery_level(
                attempt.mastery_level,
                score,
                self.rewards.mastery_pass_score,
                mode,
            );
            if mode.completes_lesson() && !already_completed {
                attempt.status = AttemptStatus::Completed;
                attempt.completed_at = Some(now_text.clone());
            }
            attempt.updated_at = now_text.clone();

            if existing.is_some() {
                lesson_attempts::update_attempt(conn, &attempt)?;
            } else {
                lesson_attempts::insert_attempt(conn, &attempt)?;
            }
            (attempt.best_score, attempt.mastery_level)
        };
        let first_completion = mode.completes_lesson() && !already_completed;

        // Profile ledger
        let mut profile = profiles::get_or_new(conn, user_id, &self.rewards, now)?;
        if let Some(offset) = ctx.utc_offset_minutes {
            profile.utc_offset_minutes = offset;
        }
        let today = local_date(now, profile.utc_offset_minutes);
        let streak_change = profile.award(xp, today);
        profiles::save_profile(conn, &profile, now)?;

        let completed_count = lesson_attempts::count_completed(conn, user_id)?;

        // Card evaluation outbox
        let job_id = uuid::Uuid::new_v4().to_string();
        let next_attempt_at = format_timestamp(now + self.cards.initial_delay());
        card_jobs::enqueue(
            conn,
            &NewCardJob {
                id: &job_id,
                user_id,
                lesson_id: &lesson.id,
                score: i32::from(score),
                total_xp: profile.total_xp,
                streak_current: i32::try_from(profile.streak.current).unwrap_or(i32::MAX),
                completed_count,
                attempts: 0,
                next_attempt_at: &next_attempt_at,
                created_at: &now_text,
                idempotency_key: request.idempotency_key.as_deref(),
            },
        )?;

        let summary = RewardSummary {
            lesson_id: lesson.id.clone(),
            attempt_mode: mode,
            xp_earned: xp,
            total_xp: profile.total_xp,
            first_completion,
            best_score,
            mastery_level,
            unlocked_cards: Vec::new(),
            streak: StreakView {
                current: profile.streak.current,
                longest: profile.streak.longest,
            },
            daily_goal: DailyGoalView {
                target: profile.daily_goal.target_xp,
                current: profile.daily_goal.xp_on(today),
                progress: profile.daily_goal.progress_percent(today),
            },
        };

        if let Some(key) = request.idempotency_key.as_deref() {
            let summary_json = summary.to_json()?;
            receipts::insert_receipt(
                conn,
                &NewCompletionReceipt {
                    user_id,
                    idempotency_key: key,
                    lesson_id: &lesson.id,
                    attempt_mode: mode.as_str(),
                    summary_json: &summary_json,
                    created_at: &now_text,
                },
            )?;
        }

        Ok(CompletionTx::Committed(Committed {
            summary,
            job_id,
            streak_change,
        }))
    }

    // ========================================================================
    // Profile mutations
    // ========================================================================

    /// Load, mutate and save the profile in one retried transaction
    fn mutate_profile<T, F>(
        &self,
        operation: &str,
        user_id: &str,
        utc_offset_minutes: Option<i32>,
        mut f: F,
    ) -> Result<T, ProgressError>
    where
        F: FnMut(&mut GamificationProfile, DateTime<Utc>) -> Result<T, ProgressError>,
    {
        let now = self.clock.now();
        self.retry.run(operation, || {
            self.db.write_transaction(|conn| {
                let mut profile = profiles::get_or_new(conn, user_id, &self.rewards, now)?;
                if let Some(offset) = utc_offset_minutes {
                    profile.utc_offset_minutes = offset;
                }
                let value = f(&mut profile, now)?;
                profiles::save_profile(conn, &profile, now)?;
                Ok(value)
            })
        })
    }

    /// Spend one heart on a wrong answer; false when already empty
    pub fn lose_heart(&self, ctx: &UserContext) -> Result<bool, ProgressError> {
        let max = self.rewards.max_hearts;
        let regen = self.rewards.heart_regen_minutes;
        let (lost, remaining) =
            self.mutate_profile("lose_heart", ctx.user_id(), ctx.utc_offset_minutes, |p, now| {
                let lost = p.hearts.lose(max, regen, now);
                Ok((lost, p.hearts.current))
            })?;
        if lost {
            self.events.emit(ProgressEvent::HeartLost {
                user_id: ctx.user_id().to_string(),
                remaining,
            });
        }
        Ok(lost)
    }

    pub fn refill_hearts(&self, ctx: &UserContext) -> Result<(), ProgressError> {
        let max = self.rewards.max_hearts;
        self.mutate_profile("refill_hearts", ctx.user_id(), ctx.utc_offset_minutes, |p, now| {
            p.hearts.refill(max, now);
            Ok(())
        })?;
        self.events.emit(ProgressEvent::HeartsRefilled {
            user_id: ctx.user_id().to_string(),
        });
        Ok(())
    }

    pub fn set_daily_goal(&self, ctx: &UserContext, target_xp: u32) -> Result<(), ProgressError> {
        self.mutate_profile("set_daily_goal", ctx.user_id(), ctx.utc_offset_minutes, |p, _| {
            p.daily_goal.set_target(target_xp)
        })?;
        self.events.emit(ProgressEvent::DailyGoalChanged {
            user_id: ctx.user_id().to_string(),
            target_xp,
        });
        Ok(())
    }

    /// Zero XP, streak and today's goal progress; attempts and cards are kept
    pub fn reset_gamification(&self, user_id: &str) -> Result<(), ProgressError> {
        let rewards = self.rewards.clone();
        self.mutate_profile("reset_gamification", user_id, None, |p, now| {
            p.reset(&rewards, now);
            Ok(())
        })?;
        self.events.emit(ProgressEvent::ProfileReset {
            user_id: user_id.to_string(),
        });
        Ok(())
    }
}
