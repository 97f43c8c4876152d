//! Pure progression rules
//!
//! Nothing in this module touches the database or the clock directly: the
//! services load snapshots, hand them to these functions, and persist what
//! comes back. That keeps gating, card matching and streak arithmetic
//! deterministic and testable on plain values.

pub mod attempt;
pub mod cards;
pub mod ledger;
pub mod leveling;
pub mod unlock;

pub use attempt::{AttemptMode, AttemptStatus, LessonResult};
pub use cards::{CardContext, CardDefinition, CardUnlockCondition, CardUnlockEvaluator};
pub use ledger::{DailyGoalState, GamificationProfile, HeartState, StreakChange, StreakState};
pub use leveling::{LevelCurve, ThresholdLevelCurve};
pub use unlock::{ChapterGate, ChapterStatuses, LessonStatus, ProgressSnapshot, UnlockEvaluator};
