//! Card service - post-commit card evaluation and its retry worker
//!
//! A completion enqueues a `card_evaluation_jobs` row inside its ledger
//! transaction. After commit the completion service asks this service to
//! evaluate it inline; if that fails the job stays in the outbox and the
//! [`CardRetryWorker`] picks it up later. Unlocks are insert-if-absent, so
//! evaluating a job twice never unlocks a card twice. The unlocks and the
//! receipt of a keyed completion are written in one transaction, so a replay
//! sees either no evaluation yet or its full result.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::clock::{format_timestamp, Clock};
use crate::config::CardRetryConfig;
use crate::content::{ContentGraph, LessonNode};
use crate::db::models::NewUserCardUnlock;
use crate::db::{card_jobs, cards, lesson_attempts, receipts, ProgressDb};
use crate::engine::{CardContext, CardUnlockEvaluator, UnlockEvaluator};
use crate::error::ProgressError;
use crate::views::RewardSummary;

use super::events::{EventBus, ProgressEvent};

/// Outcome of one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CardRetryStats {
    pub processed: usize,
    pub unlocked: usize,
    pub failed: usize,
}

pub struct CardService {
    db: Arc<ProgressDb>,
    graph: Arc<dyn ContentGraph>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    config: CardRetryConfig,
}

fn side_effect(e: ProgressError) -> ProgressError {
    match e {
        ProgressError::SideEffect(_) => e,
        other => ProgressError::SideEffect(other.to_string()),
    }
}

/// Put the cards a keyed completion unlocked on its stored summary
fn record_on_receipt(
    conn: &mut diesel::SqliteConnection,
    user_id: &str,
    key: &str,
    unlocked: &[String],
) -> Result<(), ProgressError> {
    let Some(receipt) = receipts::find_receipt(conn, user_id, key)? else {
        return Ok(());
    };
    let mut summary = RewardSummary::from_json(&receipt.summary_json)?;
    summary.unlocked_cards = unlocked.to_vec();
    receipts::update_summary(conn, user_id, key, &summary.to_json()?)
}

impl CardService {
    pub fn new(
        db: Arc<ProgressDb>,
        graph: Arc<dyn ContentGraph>,
        clock: Arc<dyn Clock>,
        events: Arc<EventBus>,
        config: CardRetryConfig,
    ) -> Self {
        Self {
            db,
            graph,
            clock,
            events,
            config,
        }
    }

    /// Delay before the first out-of-band attempt of a freshly enqueued job
    pub fn initial_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.interval().as_secs() as i64)
    }

    /// Evaluate one outbox job and delete it; returns newly unlocked card IDs
    ///
    /// A job already handled by another evaluator yields an empty list.
    /// Every failure is reported as `SideEffect`.
    pub fn evaluate_job(&self, job_id: &str) -> Result<Vec<String>, ProgressError> {
        // Phase 1: job, catalogue and existing unlocks
        let loaded = self
            .db
            .with_conn(|conn| {
                let Some(job) = card_jobs::get_job(conn, job_id)? else {
                    return Ok(None);
                };
                let definitions = cards::list_definitions(conn)?;
                let unlocked = cards::unlocked_card_ids(conn, &job.user_id)?;
                Ok(Some((job, definitions, unlocked)))
            })
            .map_err(side_effect)?;

        let Some((job, definitions, already_unlocked)) = loaded else {
            debug!(job_id = %job_id, "Card job already processed");
            return Ok(Vec::new());
        };

        let evaluator = CardUnlockEvaluator::new(&definitions);

        // Phase 2: content lookups outside any transaction
        let mut chapter_lessons: HashMap<String, Vec<LessonNode>> = HashMap::new();
        for chapter_id in evaluator.referenced_chapters(&already_unlocked) {
            // Unknown chapters never count as complete
            if self.graph.get_chapter(&chapter_id).map_err(side_effect)?.is_none() {
                continue;
            }
            let lessons = self.graph.get_chapter_lessons(&chapter_id).map_err(side_effect)?;
            chapter_lessons.insert(chapter_id, lessons);
        }
        let lesson_ids: Vec<String> = chapter_lessons
            .values()
            .flatten()
            .map(|l| l.id.clone())
            .collect();

        // Phase 3: evaluate against committed progress and record unlocks
        let unlocked_at = format_timestamp(self.clock.now());
        let inserted = self
            .db
            .write_transaction(|conn| {
                let snapshot = lesson_attempts::snapshot_for_lessons(conn, &job.user_id, &lesson_ids)?;
                let progress = UnlockEvaluator::new(&snapshot);
                let completed_chapters: HashSet<String> = chapter_lessons
                    .iter()
                    .filter(|(_, lessons)| progress.is_chapter_complete(lessons))
                    .map(|(id, _)| id.clone())
                    .collect();

                let ctx = CardContext {
                    lesson_id: &job.lesson_id,
                    score: job.score.clamp(0, 100) as u8,
                    total_xp: job.total_xp,
                    current_streak: u32::try_from(job.streak_current).unwrap_or(0),
                    completed_lesson_count: usize::try_from(job.completed_count).unwrap_or(0),
                    completed_chapters: &completed_chapters,
                };

                let mut inserted = Vec::new();
                for card in evaluator.evaluate(&already_unlocked, &ctx) {
                    let unlock = NewUserCardUnlock {
                        user_id: &job.user_id,
                        card_id: &card.id,
                        unlocked_at: &unlocked_at,
                        source_lesson_id: Some(&job.lesson_id),
                    };
                    if cards::insert_unlock_if_absent(conn, &unlock)? {
                        inserted.push(card.id.clone());
                    }
                }
                if let Some(key) = job.idempotency_key.as_deref() {
                    if !inserted.is_empty() {
                        record_on_receipt(conn, &job.user_id, key, &inserted)?;
                    }
                }
                card_jobs::delete_job(conn, &job.id)?;
                Ok(inserted)
            })
            .map_err(side_effect)?;

        for card_id in &inserted {
            self.events.emit(ProgressEvent::CardUnlocked {
                user_id: job.user_id.clone(),
                card_id: card_id.clone(),
                lesson_id: job.lesson_id.clone(),
            });
        }
        Ok(inserted)
    }

    /// Record a failed evaluation and schedule the next attempt
    pub fn defer_job(&self, job_id: &str, user_id: &str, error: &ProgressError) {
        let now = self.clock.now();
        let message = error.to_string();
        let max_attempts = self.config.max_attempts;
        let base = self.config.interval();

        let result = self.db.with_conn(|conn| {
            let Some(job) = card_jobs::get_job(conn, job_id)? else {
                return Ok(None);
            };
            let attempts = u32::try_from(job.attempts).unwrap_or(0);
            let factor = 1u32.checked_shl(attempts.min(10)).unwrap_or(1024);
            let delay = base.saturating_mul(factor);
            let next = now + chrono::Duration::seconds(delay.as_secs() as i64);
            card_jobs::record_failure(conn, job_id, &message, &format_timestamp(next))?;
            Ok(Some(attempts + 1))
        });

        match result {
            Ok(Some(attempts)) if attempts >= max_attempts => {
                error!(
                    job_id = %job_id,
                    user_id = %user_id,
                    attempts,
                    error = %message,
                    "Card evaluation parked after max attempts"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to record card evaluation failure");
            }
        }

        self.events.emit(ProgressEvent::CardEvaluationDeferred {
            user_id: user_id.to_string(),
            job_id: job_id.to_string(),
            error: message,
        });
    }

    /// Evaluate every due job once
    pub fn process_due_jobs(&self) -> Result<CardRetryStats, ProgressError> {
        let now = format_timestamp(self.clock.now());
        let max_attempts = i32::try_from(self.config.max_attempts).unwrap_or(i32::MAX);
        let due = self
            .db
            .with_conn(|conn| card_jobs::due_jobs(conn, &now, max_attempts, self.config.batch_size))?;

        let mut stats = CardRetryStats::default();
        for job in due {
            match self.evaluate_job(&job.id) {
                Ok(unlocked) => {
                    stats.processed += 1;
                    stats.unlocked += unlocked.len();
                }
                Err(e) => {
                    stats.failed += 1;
                    self.defer_job(&job.id, &job.user_id, &e);
                }
            }
        }
        Ok(stats)
    }

    pub fn pending_jobs(&self) -> Result<i64, ProgressError> {
        self.db.with_conn(card_jobs::count_pending)
    }
}

/// Background loop draining the card evaluation outbox
pub struct CardRetryWorker {
    service: Arc<CardService>,
    interval: Duration,
}

impl CardRetryWorker {
    pub fn new(service: Arc<CardService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval_secs = self.interval.as_secs(), "Card retry worker started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let service = self.service.clone();
                    match tokio::task::spawn_blocking(move || service.process_due_jobs()).await {
                        Ok(Ok(stats)) if stats.processed + stats.failed > 0 => {
                            info!(
                                processed = stats.processed,
                                unlocked = stats.unlocked,
                                failed = stats.failed,
                                "Card retry pass finished"
                            );
                        }
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => warn!(error = %e, "Card retry pass failed (will retry next interval)"),
                        Err(e) => error!(error = %e, "Card retry task panicked"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Card retry worker shutting down");
                    break;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
