//! Lesson attempt status, replay modes and submitted results

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ProgressError;

/// Highest mastery level a lesson can reach
pub const MAX_MASTERY_LEVEL: u32 = 5;

/// Persisted status of a (user, lesson) attempt record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::NotStarted => "not_started",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ProgressError> {
        match value {
            "not_started" => Ok(AttemptStatus::NotStarted),
            "in_progress" => Ok(AttemptStatus::InProgress),
            "completed" => Ok(AttemptStatus::Completed),
            other => Err(ProgressError::Internal(format!(
                "Unknown attempt status in ledger: {}",
                other
            ))),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptStatus::Completed)
    }
}

/// How a lesson was played; passed through to completion, never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum AttemptMode {
    #[default]
    Normal,
    Review,
    Legendary,
}

impl AttemptMode {
    /// Resolve the `review` / `legendary` request flags
    pub fn from_flags(review: bool, legendary: bool) -> Result<Self, ProgressError> {
        match (review, legendary) {
            (false, false) => Ok(AttemptMode::Normal),
            (true, false) => Ok(AttemptMode::Review),
            (false, true) => Ok(AttemptMode::Legendary),
            (true, true) => Err(ProgressError::InvalidInput(
                "review and legendary are mutually exclusive".into(),
            )),
        }
    }

    /// Whether this mode marks the lesson completed
    pub fn completes_lesson(&self) -> bool {
        !matches!(self, AttemptMode::Review)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptMode::Normal => "normal",
            AttemptMode::Review => "review",
            AttemptMode::Legendary => "legendary",
        }
    }
}

/// Result submitted by the client when a lesson finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonResult {
    /// Percentage, 0-100
    pub score: i32,
    pub correct_count: i32,
    pub total_questions: i32,
    pub mode: AttemptMode,
}

impl LessonResult {
    pub fn validate(&self) -> Result<(), ProgressError> {
        if !(0..=100).contains(&self.score) {
            return Err(ProgressError::InvalidInput(format!(
                "score must be between 0 and 100, got {}",
                self.score
            )));
        }
        if self.total_questions < 0 {
            return Err(ProgressError::InvalidInput(
                "totalQuestions must not be negative".into(),
            ));
        }
        if self.correct_count < 0 || self.correct_count > self.total_questions {
            return Err(ProgressError::InvalidInput(format!(
                "correctCount must be between 0 and totalQuestions ({}), got {}",
                self.total_questions, self.correct_count
            )));
        }
        Ok(())
    }

    /// Score as a percentage; only valid after [`LessonResult::validate`]
    pub fn score_percent(&self) -> u8 {
        self.score.clamp(0, 100) as u8
    }
}

/// Mastery after a scored completion
///
/// A passing score raises mastery by one; a passing legendary run jumps
/// straight to the top level. Failing scores leave mastery unchanged.
pub fn next_mastery_level(current: u32, score: u8, pass_score: u8, mode: AttemptMode) -> u32 {
    if score < pass_score {
        return current;
    }
    match mode {
        AttemptMode::Legendary => MAX_MASTERY_LEVEL,
        AttemptMode::Normal | AttemptMode::Review => (current + 1).min(MAX_MASTERY_LEVEL),
    }
}
