//! Shared fixtures for integration tests
//!
//! Every harness opens a file-backed SQLite ledger in a temp dir so several
//! pooled connections share one database, and drives time with a
//! `ManualClock`.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sangha_progress::engine::{AttemptMode, LessonResult};
use sangha_progress::services::CompletionOutcome;
use sangha_progress::{
    CompletionRequest, Config, ContentImport, ManualClock, ProgressDb, ProgressError, Services,
    UserContext,
};
use tempfile::TempDir;

/// w1: c1 [l1, l2, l3], c2 (empty), c3 [l4, l5, l6]; w2: c4 [l7, l8]
pub const CONTENT: &str = r#"{
    "worlds": [
        {"id": "w1", "title": "Foundations", "orderIndex": 0, "chapters": [
            {"id": "c1", "title": "The Life of the Buddha", "orderIndex": 0, "lessons": [
                {"id": "l1", "title": "Birth in Lumbini", "orderIndex": 0, "xpReward": 10},
                {"id": "l2", "title": "The Four Sights", "orderIndex": 1, "xpReward": 10},
                {"id": "l3", "title": "Awakening", "orderIndex": 2, "xpReward": 10}
            ]},
            {"id": "c2", "title": "Interlude", "orderIndex": 1, "lessons": []},
            {"id": "c3", "title": "The Four Noble Truths", "orderIndex": 2, "lessons": [
                {"id": "l4", "title": "Dukkha", "orderIndex": 0, "xpReward": 10},
                {"id": "l5", "title": "Samudaya", "orderIndex": 1, "xpReward": 10},
                {"id": "l6", "title": "Nirodha", "orderIndex": 2, "xpReward": 10}
            ]}
        ]},
        {"id": "w2", "title": "The Eightfold Path", "orderIndex": 1, "chapters": [
            {"id": "c4", "title": "Wisdom", "orderIndex": 0, "lessons": [
                {"id": "l7", "title": "Right View", "orderIndex": 0, "xpReward": 10},
                {"id": "l8", "title": "Right Intention", "orderIndex": 1, "xpReward": 10}
            ]}
        ]}
    ],
    "cards": [
        {"id": "card-first", "title": "The First Step", "unlockCondition": {"type": "first_lesson"}},
        {"id": "card-perfect", "title": "Clear Mind", "unlockCondition": {"type": "perfect_quiz"}},
        {"id": "card-perfect-l3", "title": "Bodhi Leaf", "unlockCondition": {"type": "perfect_quiz", "lessonId": "l3"}},
        {"id": "card-streak-7", "title": "Diligence", "unlockCondition": {"type": "streak", "days": 7}},
        {"id": "card-xp-50", "title": "Dharma Wheel", "unlockCondition": {"type": "xp_threshold", "xp": 50}},
        {"id": "card-c1", "title": "Sangha", "unlockCondition": {"type": "chapter_complete", "chapterId": "c1"}}
    ]
}"#;

pub struct Harness {
    pub services: Arc<Services>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
    _dir: TempDir,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage_dir = dir.path().to_path_buf();
    config.pool_size = 4;
    config.busy_timeout_ms = 5_000;
    config.retry.base_delay_ms = 1;
    config.retry.max_attempts = 8;
    config
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(customize: impl FnOnce(&mut Config)) -> Harness {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    customize(&mut config);

    let db = Arc::new(
        ProgressDb::open(&config.database_path(), config.pool_size, config.busy_timeout_ms)
            .unwrap(),
    );
    // 09:00 UTC, Wednesday 1 May 2024
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let services = Arc::new(Services::with_clock(db, &config, clock.clone()));
    services
        .import_content(&ContentImport::from_json(CONTENT).unwrap())
        .unwrap();

    Harness {
        services,
        clock,
        config,
        _dir: dir,
    }
}

impl Harness {
    pub fn next_day(&self) {
        self.clock.advance(Duration::days(1));
    }

    pub fn complete(
        &self,
        ctx: &UserContext,
        lesson_id: &str,
        score: i32,
    ) -> Result<CompletionOutcome, ProgressError> {
        self.complete_with(ctx, lesson_id, score, AttemptMode::Normal, None)
    }

    pub fn complete_with(
        &self,
        ctx: &UserContext,
        lesson_id: &str,
        score: i32,
        mode: AttemptMode,
        idempotency_key: Option<&str>,
    ) -> Result<CompletionOutcome, ProgressError> {
        self.services.completion.complete_lesson(
            ctx,
            CompletionRequest {
                lesson_id: lesson_id.to_string(),
                result: LessonResult {
                    score,
                    correct_count: 5,
                    total_questions: 5,
                    mode,
                },
                idempotency_key: idempotency_key.map(str::to_string),
            },
        )
    }
}

pub fn user(id: &str) -> UserContext {
    UserContext::new(id).unwrap()
}
