//! Exactly-once completion and insert-once card unlocks under retries
//! and concurrent requests

mod common;

use std::sync::Arc;
use std::thread;

use common::{harness, user};
use sangha_progress::engine::AttemptMode;
use sangha_progress::ProgressError;

#[test]
fn test_replay_with_same_key_returns_identical_summary() {
    let h = harness();
    let u = user("u1");

    let first = h
        .complete_with(&u, "l1", 100, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    assert!(!first.replayed);
    assert!(!first.summary.unlocked_cards.is_empty());

    let replay = h
        .complete_with(&u, "l1", 100, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(
        replay.summary.to_json().unwrap(),
        first.summary.to_json().unwrap()
    );

    let summary = h.services.progress.summary(&u).unwrap();
    assert_eq!(summary.total_xp, 10);
    assert_eq!(summary.completed_lessons, 1);
    assert_eq!(h.services.db().stats().unwrap().attempt_count, 1);
}

#[test]
fn test_replay_ignores_changed_payload() {
    let h = harness();
    let u = user("u1");

    let first = h
        .complete_with(&u, "l1", 60, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    // A retried request with a different score must not re-score
    let replay = h
        .complete_with(&u, "l1", 100, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.summary, first.summary);
    assert_eq!(replay.summary.best_score, 60);
}

#[test]
fn test_key_reused_for_other_lesson_is_rejected() {
    let h = harness();
    let u = user("u1");

    h.complete_with(&u, "l1", 90, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    let err = h
        .complete_with(&u, "l2", 90, AttemptMode::Normal, Some("key-1"))
        .unwrap_err();
    assert!(matches!(err, ProgressError::InvalidInput(_)));

    // Keys are scoped per user
    let other = h
        .complete_with(&user("u2"), "l1", 90, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    assert!(!other.replayed);
}

#[test]
fn test_new_key_does_not_allow_second_normal_completion() {
    let h = harness();
    let u = user("u1");

    h.complete_with(&u, "l1", 90, AttemptMode::Normal, Some("key-1"))
        .unwrap();
    let err = h
        .complete_with(&u, "l1", 90, AttemptMode::Normal, Some("key-2"))
        .unwrap_err();
    assert!(matches!(err, ProgressError::AlreadyCompleted { .. }));
    assert_eq!(h.services.progress.summary(&u).unwrap().total_xp, 10);
}

#[test]
fn test_blank_or_oversized_key_rejected() {
    let h = harness();
    let u = user("u1");
    let long = "k".repeat(129);

    for key in ["  ", long.as_str()] {
        let err = h
            .complete_with(&u, "l1", 90, AttemptMode::Normal, Some(key))
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidInput(_)));
    }
    assert_eq!(h.services.progress.summary(&u).unwrap().total_xp, 0);
}

/// The same retried request racing itself mutates exactly once
#[test]
fn test_concurrent_same_key_mutates_once() {
    let h = Arc::new(harness());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            thread::spawn(move || {
                h.complete_with(&user("u1"), "l1", 100, AttemptMode::Normal, Some("retry-me"))
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    for outcome in &outcomes {
        assert_eq!(outcome.summary.xp_earned, 10);
        assert_eq!(outcome.summary.total_xp, 10);
    }
    assert_eq!(h.services.progress.summary(&user("u1")).unwrap().total_xp, 10);
}

/// Without a shared key, concurrent normal completions still credit once
#[test]
fn test_concurrent_distinct_requests_credit_once() {
    let h = Arc::new(harness());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let h = h.clone();
            thread::spawn(move || {
                let key = format!("key-{}", i);
                h.complete_with(&user("u1"), "l1", 90, AttemptMode::Normal, Some(&key))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, ProgressError::AlreadyCompleted { .. })));
    assert_eq!(h.services.progress.summary(&user("u1")).unwrap().total_xp, 10);
}

/// Concurrent qualifying completions unlock a card exactly once
#[test]
fn test_card_inserted_once_under_concurrency() {
    let h = Arc::new(harness());
    h.complete(&user("u1"), "l1", 80).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let h = h.clone();
            thread::spawn(move || {
                h.complete_with(&user("u1"), "l1", 100, AttemptMode::Review, None)
                    .unwrap()
                    .summary
            })
        })
        .collect();
    let summaries: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();

    let unlocked_perfect = summaries
        .iter()
        .filter(|s| s.unlocked_cards.contains(&"card-perfect".to_string()))
        .count();
    assert_eq!(unlocked_perfect, 1);

    let review_xp = i64::from(h.config.rewards.review_xp);
    let summary = h.services.progress.summary(&user("u1")).unwrap();
    assert_eq!(summary.total_xp, 10 + 6 * review_xp);

    let collection = h.services.progress.card_collection(&user("u1")).unwrap();
    assert_eq!(
        collection
            .iter()
            .filter(|c| c.card.id == "card-perfect" && c.unlocked_at.is_some())
            .count(),
        1
    );
    assert_eq!(h.services.cards.pending_jobs().unwrap(), 0);
}

/// A start racing a completion never leaves the lesson anywhere but completed
#[test]
fn test_start_racing_completion_keeps_completed() {
    let h = Arc::new(harness());

    let starter = {
        let h = h.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                h.services.completion.start_lesson(&user("u1"), "l1").unwrap();
            }
        })
    };
    let completer = {
        let h = h.clone();
        thread::spawn(move || h.complete(&user("u1"), "l1", 90).unwrap())
    };
    starter.join().unwrap();
    completer.join().unwrap();

    let status = h
        .services
        .progress
        .lesson_status(&user("u1"), "l1")
        .unwrap()
        .status;
    assert_eq!(status, sangha_progress::engine::LessonStatus::Completed);
}
