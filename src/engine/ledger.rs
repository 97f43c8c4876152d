//! Gamification ledger arithmetic: streak, daily goal, hearts, XP
//!
//! All dates are the user's local calendar dates (see [`crate::clock::local_date`]).

use chrono::{DateTime, NaiveDate, Utc};

use super::attempt::AttemptMode;
use crate::config::RewardConfig;
use crate::error::ProgressError;

/// Upper bound accepted for a daily goal target
pub const MAX_DAILY_GOAL_XP: u32 = 1_000;

// ============================================================================
// Streak
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub last_active: Option<NaiveDate>,
}

/// What an XP-earning completion did to the streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// Already active today
    Unchanged,
    /// Active yesterday, now one day longer
    Extended,
    /// First activity ever
    Started,
    /// Gap of more than one day; back to 1
    Reset,
}

impl StreakChange {
    pub fn advanced(&self) -> bool {
        !matches!(self, StreakChange::Unchanged)
    }
}

impl StreakState {
    /// Record XP-earning activity on `today`
    ///
    /// Increments at most once per calendar day. A `today` earlier than the
    /// last active date (offset moved west) counts as the same day.
    pub fn advance(&mut self, today: NaiveDate) -> StreakChange {
        let change = match self.last_active {
            None => {
                self.current = 1;
                StreakChange::Started
            }
            Some(last) if today <= last => return StreakChange::Unchanged,
            Some(last) if last.succ_opt() == Some(today) => {
                self.current = self.current.saturating_add(1);
                StreakChange::Extended
            }
            Some(_) => {
                self.current = 1;
                StreakChange::Reset
            }
        };
        self.last_active = Some(today);
        self.longest = self.longest.max(self.current);
        change
    }

    /// Streak as seen on `today` without recording activity
    ///
    /// A streak whose last activity is older than yesterday is already broken.
    pub fn effective_current(&self, today: NaiveDate) -> u32 {
        match self.last_active {
            Some(last) if last >= today || last.succ_opt() == Some(today) => self.current,
            _ => 0,
        }
    }
}

// ============================================================================
// Daily goal
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyGoalState {
    pub target_xp: u32,
    pub xp_today: u32,
    pub date: Option<NaiveDate>,
}

impl DailyGoalState {
    pub fn new(target_xp: u32) -> Self {
        Self {
            target_xp,
            xp_today: 0,
            date: None,
        }
    }

    /// Reset `xp_today` when the local date has moved past `date`
    pub fn roll(&mut self, today: NaiveDate) {
        match self.date {
            Some(date) if date >= today => {}
            _ => {
                self.xp_today = 0;
                self.date = Some(today);
            }
        }
    }

    pub fn add(&mut self, today: NaiveDate, xp: u32) {
        self.roll(today);
        self.xp_today = self.xp_today.saturating_add(xp);
    }

    /// XP earned on `today` without mutating
    pub fn xp_on(&self, today: NaiveDate) -> u32 {
        match self.date {
            Some(date) if date >= today => self.xp_today,
            _ => 0,
        }
    }

    /// Percentage towards the target on `today`, capped at 100
    pub fn progress_percent(&self, today: NaiveDate) -> u32 {
        if self.target_xp == 0 {
            return 100;
        }
        let pct = u64::from(self.xp_on(today)) * 100 / u64::from(self.target_xp);
        pct.min(100) as u32
    }

    pub fn set_target(&mut self, target_xp: u32) -> Result<(), ProgressError> {
        if !(1..=MAX_DAILY_GOAL_XP).contains(&target_xp) {
            return Err(ProgressError::InvalidInput(format!(
                "daily goal must be between 1 and {} XP, got {}",
                MAX_DAILY_GOAL_XP, target_xp
            )));
        }
        self.target_xp = target_xp;
        Ok(())
    }
}

// ============================================================================
// Hearts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartState {
    pub current: u32,
    /// Instant the regeneration clock last started ticking
    pub updated_at: DateTime<Utc>,
}

impl HeartState {
    pub fn full(max: u32, now: DateTime<Utc>) -> Self {
        Self {
            current: max,
            updated_at: now,
        }
    }

    /// Apply lazy regeneration: one heart per `regen_minutes`, up to `max`
    pub fn regenerate(&mut self, max: u32, regen_minutes: u32, now: DateTime<Utc>) {
        if self.current >= max {
            self.current = max;
            self.updated_at = now;
            return;
        }
        if regen_minutes == 0 || now <= self.updated_at {
            return;
        }
        let elapsed = (now - self.updated_at).num_minutes();
        let gained = elapsed / i64::from(regen_minutes);
        if gained <= 0 {
            return;
        }
        let missing = i64::from(max - self.current);
        if gained >= missing {
            self.current = max;
            self.updated_at = now;
        } else {
            self.current += gained as u32;
            // Keep the partial interval towards the next heart
            self.updated_at += chrono::Duration::minutes(gained * i64::from(regen_minutes));
        }
    }

    /// Spend one heart; saturates at zero
    pub fn lose(&mut self, max: u32, regen_minutes: u32, now: DateTime<Utc>) -> bool {
        self.regenerate(max, regen_minutes, now);
        if self.current == 0 {
            return false;
        }
        if self.current == max {
            // Regeneration starts counting from the first lost heart
            self.updated_at = now;
        }
        self.current -= 1;
        true
    }

    pub fn refill(&mut self, max: u32, now: DateTime<Utc>) {
        self.current = max;
        self.updated_at = now;
    }

    /// Instant the next heart comes back, after [`HeartState::regenerate`]
    pub fn next_heart_at(&self, max: u32, regen_minutes: u32) -> Option<DateTime<Utc>> {
        if self.current >= max || regen_minutes == 0 {
            return None;
        }
        Some(self.updated_at + chrono::Duration::minutes(i64::from(regen_minutes)))
    }
}

// ============================================================================
// Profile
// ============================================================================

/// Per-user gamification state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamificationProfile {
    pub user_id: String,
    pub total_xp: i64,
    pub hearts: HeartState,
    pub streak: StreakState,
    pub daily_goal: DailyGoalState,
    pub utc_offset_minutes: i32,
    /// Optimistic concurrency version; 0 for a profile not yet persisted
    pub version: i64,
}

impl GamificationProfile {
    pub fn new(user_id: impl Into<String>, rewards: &RewardConfig, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            total_xp: 0,
            hearts: HeartState::full(rewards.max_hearts, now),
            streak: StreakState::default(),
            daily_goal: DailyGoalState::new(rewards.default_daily_goal_xp),
            utc_offset_minutes: rewards.default_utc_offset_minutes,
            version: 0,
        }
    }

    /// Credit XP earned on `today`; returns the streak change
    ///
    /// Zero XP never advances the streak.
    pub fn award(&mut self, xp: u32, today: NaiveDate) -> StreakChange {
        self.daily_goal.roll(today);
        if xp == 0 {
            return StreakChange::Unchanged;
        }
        self.total_xp = self.total_xp.saturating_add(i64::from(xp));
        self.daily_goal.add(today, xp);
        self.streak.advance(today)
    }

    /// Administrative reset; the only sanctioned XP decrease
    pub fn reset(&mut self, rewards: &RewardConfig, now: DateTime<Utc>) {
        self.total_xp = 0;
        self.streak = StreakState::default();
        self.daily_goal = DailyGoalState::new(self.daily_goal.target_xp);
        self.hearts = HeartState::full(rewards.max_hearts, now);
    }
}

/// XP awarded for one completion
///
/// `already_completed` is the record status before this call.
pub fn xp_for_completion(
    mode: AttemptMode,
    lesson_xp_reward: u32,
    already_completed: bool,
    rewards: &RewardConfig,
) -> u32 {
    match mode {
        AttemptMode::Normal if already_completed => 0,
        AttemptMode::Normal => lesson_xp_reward,
        AttemptMode::Review => rewards.review_xp,
        AttemptMode::Legendary => rewards.legendary_xp,
    }
}
