//! Collectible card unlock conditions
//!
//! Conditions are a closed tagged union stored as JSON on the card
//! definition, e.g. `{"type":"streak","days":7}`. Unknown kinds fail to
//! parse at import time rather than silently never matching.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::ProgressError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum CardUnlockCondition {
    /// Completed-lesson count is exactly one after this completion
    FirstLesson,
    /// Current streak has reached `days`
    Streak { days: u32 },
    /// Score 100 on this completion; restricted to one lesson when `lessonId` is set
    PerfectQuiz {
        #[serde(default, rename = "lessonId", skip_serializing_if = "Option::is_none")]
        #[ts(optional)]
        lesson_id: Option<String>,
    },
    /// Total XP is at least `xp`
    XpThreshold { xp: u32 },
    /// Every lesson of the chapter is completed
    ChapterComplete {
        #[serde(rename = "chapterId")]
        chapter_id: String,
    },
}

impl CardUnlockCondition {
    pub fn from_json(value: &str) -> Result<Self, ProgressError> {
        Ok(serde_json::from_str(value)?)
    }

    pub fn to_json(&self) -> Result<String, ProgressError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn is_met(&self, ctx: &CardContext<'_>) -> bool {
        match self {
            CardUnlockCondition::FirstLesson => ctx.completed_lesson_count == 1,
            CardUnlockCondition::Streak { days } => ctx.current_streak >= *days,
            CardUnlockCondition::PerfectQuiz { lesson_id: None } => ctx.score == 100,
            CardUnlockCondition::PerfectQuiz {
                lesson_id: Some(lesson_id),
            } => ctx.score == 100 && ctx.lesson_id == lesson_id,
            CardUnlockCondition::XpThreshold { xp } => ctx.total_xp >= i64::from(*xp),
            CardUnlockCondition::ChapterComplete { chapter_id } => {
                ctx.completed_chapters.contains(chapter_id)
            }
        }
    }

    /// Chapter whose completion this condition needs, if any
    pub fn referenced_chapter(&self) -> Option<&str> {
        match self {
            CardUnlockCondition::ChapterComplete { chapter_id } => Some(chapter_id),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CardUnlockCondition::FirstLesson => "first_lesson",
            CardUnlockCondition::Streak { .. } => "streak",
            CardUnlockCondition::PerfectQuiz { .. } => "perfect_quiz",
            CardUnlockCondition::XpThreshold { .. } => "xp_threshold",
            CardUnlockCondition::ChapterComplete { .. } => "chapter_complete",
        }
    }
}

/// Post-completion state a condition is checked against
#[derive(Debug, Clone)]
pub struct CardContext<'a> {
    pub lesson_id: &'a str,
    pub score: u8,
    pub total_xp: i64,
    pub current_streak: u32,
    pub completed_lesson_count: usize,
    /// Chapters (among those referenced by candidate cards) that are fully completed
    pub completed_chapters: &'a HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub unlock_condition: CardUnlockCondition,
}

/// Rule engine over a fixed set of card definitions
pub struct CardUnlockEvaluator<'a> {
    cards: &'a [CardDefinition],
}

impl<'a> CardUnlockEvaluator<'a> {
    pub fn new(cards: &'a [CardDefinition]) -> Self {
        Self { cards }
    }

    /// Cards not yet in `already_unlocked` whose condition holds
    pub fn evaluate(
        &self,
        already_unlocked: &HashSet<String>,
        ctx: &CardContext<'_>,
    ) -> Vec<&'a CardDefinition> {
        self.cards
            .iter()
            .filter(|card| !already_unlocked.contains(&card.id))
            .filter(|card| card.unlock_condition.is_met(ctx))
            .collect()
    }

    /// Chapters the still-locked cards care about
    pub fn referenced_chapters(&self, already_unlocked: &HashSet<String>) -> HashSet<String> {
        self.cards
            .iter()
            .filter(|card| !already_unlocked.contains(&card.id))
            .filter_map(|card| card.unlock_condition.referenced_chapter())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(id: &str, condition: CardUnlockCondition) -> CardDefinition {
        CardDefinition {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            unlock_condition: condition,
        }
    }

    fn ctx<'a>(lesson_id: &'a str, score: u8, chapters: &'a HashSet<String>) -> CardContext<'a> {
        CardContext {
            lesson_id,
            score,
            total_xp: 10,
            current_streak: 1,
            completed_lesson_count: 1,
            completed_chapters: chapters,
        }
    }

    #[test]
    fn test_condition_json_shapes() {
        let parsed = CardUnlockCondition::from_json(r#"{"type":"streak","days":7}"#).unwrap();
        assert_eq!(parsed, CardUnlockCondition::Streak { days: 7 });

        let any = CardUnlockCondition::from_json(r#"{"type":"perfect_quiz"}"#).unwrap();
        assert_eq!(any, CardUnlockCondition::PerfectQuiz { lesson_id: None });

        let specific =
            CardUnlockCondition::from_json(r#"{"type":"perfect_quiz","lessonId":"l-3"}"#).unwrap();
        assert_eq!(
            specific,
            CardUnlockCondition::PerfectQuiz {
                lesson_id: Some("l-3".into())
            }
        );

        let chapter =
            CardUnlockCondition::from_json(r#"{"type":"chapter_complete","chapterId":"c1"}"#)
                .unwrap();
        assert_eq!(chapter.referenced_chapter(), Some("c1"));
        assert_eq!(chapter.to_json().unwrap(), r#"{"type":"chapter_complete","chapterId":"c1"}"#);
    }

    #[test]
    fn test_unknown_condition_rejected() {
        assert!(CardUnlockCondition::from_json(r#"{"type":"meditate_daily"}"#).is_err());
        assert!(CardUnlockCondition::from_json(r#"{"type":"streak"}"#).is_err());
    }

    #[test]
    fn test_perfect_quiz_matching() {
        let chapters = HashSet::new();
        let any = CardUnlockCondition::PerfectQuiz { lesson_id: None };
        let only_l2 = CardUnlockCondition::PerfectQuiz {
            lesson_id: Some("l2".into()),
        };

        assert!(any.is_met(&ctx("l1", 100, &chapters)));
        assert!(!any.is_met(&ctx("l1", 99, &chapters)));
        assert!(!only_l2.is_met(&ctx("l1", 100, &chapters)));
        assert!(only_l2.is_met(&ctx("l2", 100, &chapters)));
    }

    #[test]
    fn test_first_lesson_only_on_count_one() {
        let chapters = HashSet::new();
        let mut context = ctx("l1", 70, &chapters);
        assert!(CardUnlockCondition::FirstLesson.is_met(&context));
        context.completed_lesson_count = 2;
        assert!(!CardUnlockCondition::FirstLesson.is_met(&context));
    }

    #[test]
    fn test_thresholds() {
        let chapters = HashSet::new();
        let mut context = ctx("l1", 70, &chapters);
        context.total_xp = 100;
        context.current_streak = 6;

        assert!(CardUnlockCondition::XpThreshold { xp: 100 }.is_met(&context));
        assert!(!CardUnlockCondition::XpThreshold { xp: 101 }.is_met(&context));
        assert!(!CardUnlockCondition::Streak { days: 7 }.is_met(&context));
        context.current_streak = 7;
        assert!(CardUnlockCondition::Streak { days: 7 }.is_met(&context));
    }

    #[test]
    fn test_evaluator_skips_unlocked_cards() {
        let cards = vec![
            card("first", CardUnlockCondition::FirstLesson),
            card("perfect", CardUnlockCondition::PerfectQuiz { lesson_id: None }),
            card(
                "chapter-1",
                CardUnlockCondition::ChapterComplete {
                    chapter_id: "c1".into(),
                },
            ),
        ];
        let evaluator = CardUnlockEvaluator::new(&cards);
        let completed: HashSet<String> = ["c1".to_string()].into_iter().collect();
        let already: HashSet<String> = ["first".to_string()].into_iter().collect();

        let unlocked: Vec<_> = evaluator
            .evaluate(&already, &ctx("l1", 100, &completed))
            .into_iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(unlocked, vec!["perfect", "chapter-1"]);

        let all: HashSet<String> = cards.iter().map(|c| c.id.clone()).collect();
        assert!(evaluator.referenced_chapters(&all).is_empty());
        assert_eq!(evaluator.referenced_chapters(&already).len(), 1);
    }
}
