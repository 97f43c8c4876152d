//! Level curves: total XP -> level

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Pluggable mapping from total XP to a level
pub trait LevelCurve: Send + Sync {
    /// Level for `total_xp`; level 1 at zero XP
    fn level_for(&self, total_xp: i64) -> u32;

    /// Total XP at which `level` begins, `None` past the cap
    fn xp_for_level(&self, level: u32) -> Option<i64>;

    fn progress(&self, total_xp: i64) -> LevelProgress {
        let level = self.level_for(total_xp);
        let level_start = self.xp_for_level(level).unwrap_or(0);
        let next_level_xp = self.xp_for_level(level + 1);
        LevelProgress {
            level,
            xp_into_level: (total_xp - level_start).max(0),
            next_level_xp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct LevelProgress {
    pub level: u32,
    pub xp_into_level: i64,
    /// Absent at the top level
    pub next_level_xp: Option<i64>,
}

/// Stepwise table of level start thresholds
#[derive(Debug, Clone)]
pub struct ThresholdLevelCurve {
    /// `thresholds[i]` is the XP at which level `i + 1` begins
    thresholds: Vec<i64>,
}

const DEFAULT_THRESHOLDS: [i64; 25] = [
    0, 60, 120, 200, 300, 450, 750, 1_125, 1_650, 2_250, 3_000, 3_900, 4_900, 6_000, 7_500,
    9_000, 10_500, 12_000, 13_500, 15_000, 17_000, 19_000, 22_500, 26_000, 30_000,
];

impl ThresholdLevelCurve {
    /// Thresholds are sorted and deduplicated; level 1 always starts at 0
    pub fn new(mut thresholds: Vec<i64>) -> Self {
        thresholds.push(0);
        thresholds.retain(|t| *t >= 0);
        thresholds.sort_unstable();
        thresholds.dedup();
        Self { thresholds }
    }

    pub fn max_level(&self) -> u32 {
        self.thresholds.len() as u32
    }
}

impl Default for ThresholdLevelCurve {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLDS.to_vec())
    }
}

impl LevelCurve for ThresholdLevelCurve {
    fn level_for(&self, total_xp: i64) -> u32 {
        let reached = self.thresholds.partition_point(|t| *t <= total_xp);
        reached.max(1) as u32
    }

    fn xp_for_level(&self, level: u32) -> Option<i64> {
        if level == 0 {
            return None;
        }
        self.thresholds.get(level as usize - 1).copied()
    }
}
