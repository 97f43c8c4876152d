//! Configuration for sangha-progress

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ProgressError;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sangha-progress")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite ledger and config.toml
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// HTTP API port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on a locked database before erroring
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub rewards: RewardConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub card_retry: CardRetryConfig,

    /// Gateway user IDs allowed to call the administrative routes
    #[serde(default)]
    pub admin_user_ids: Vec<String>,
}

/// XP amounts and gamification limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Fixed XP for a review replay of a completed lesson
    #[serde(default = "default_review_xp")]
    pub review_xp: u32,

    /// Fixed XP for a legendary run
    #[serde(default = "default_legendary_xp")]
    pub legendary_xp: u32,

    /// Daily goal for new profiles
    #[serde(default = "default_daily_goal_xp")]
    pub default_daily_goal_xp: u32,

    #[serde(default = "default_max_hearts")]
    pub max_hearts: u32,

    /// Minutes to regenerate one heart (0 disables regeneration)
    #[serde(default = "default_heart_regen_minutes")]
    pub heart_regen_minutes: u32,

    /// Minimum score that raises mastery
    #[serde(default = "default_mastery_pass_score")]
    pub mastery_pass_score: u8,

    /// Offset used when neither the request nor the profile carries one
    #[serde(default)]
    pub default_utc_offset_minutes: i32,
}

/// Bounded retry for ledger write conflicts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// First backoff delay; doubles per attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Out-of-band card evaluation retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRetryConfig {
    #[serde(default = "default_card_retry_interval")]
    pub interval_secs: u64,

    /// Attempts before a job is parked for manual inspection
    #[serde(default = "default_card_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_card_retry_batch")]
    pub batch_size: i64,
}

fn default_http_port() -> u16 {
    8095
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    2_000
}

fn default_review_xp() -> u32 {
    5
}

fn default_legendary_xp() -> u32 {
    40
}

fn default_daily_goal_xp() -> u32 {
    20
}

fn default_max_hearts() -> u32 {
    5
}

fn default_heart_regen_minutes() -> u32 {
    30
}

fn default_mastery_pass_score() -> u8 {
    80
}

fn default_retry_attempts() -> u32 {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    15
}

fn default_card_retry_interval() -> u64 {
    30
}

fn default_card_retry_attempts() -> u32 {
    8
}

fn default_card_retry_batch() -> i64 {
    50
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            review_xp: default_review_xp(),
            legendary_xp: default_legendary_xp(),
            default_daily_goal_xp: default_daily_goal_xp(),
            max_hearts: default_max_hearts(),
            heart_regen_minutes: default_heart_regen_minutes(),
            mastery_pass_score: default_mastery_pass_score(),
            default_utc_offset_minutes: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for CardRetryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_card_retry_interval(),
            max_attempts: default_card_retry_attempts(),
            batch_size: default_card_retry_batch(),
        }
    }
}

impl CardRetryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            http_port: default_http_port(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            rewards: RewardConfig::default(),
            retry: RetryConfig::default(),
            card_retry: CardRetryConfig::default(),
            admin_user_ids: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProgressError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ProgressError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgressError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ProgressError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the engine can't honour
    pub fn validate(&self) -> Result<(), ProgressError> {
        if self.pool_size == 0 {
            return Err(ProgressError::Config("pool_size must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ProgressError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.rewards.max_hearts == 0 {
            return Err(ProgressError::Config("rewards.max_hearts must be at least 1".into()));
        }
        if self.rewards.mastery_pass_score > 100 {
            return Err(ProgressError::Config(
                "rewards.mastery_pass_score must be between 0 and 100".into(),
            ));
        }
        if self.admin_user_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(ProgressError::Config("admin_user_ids must not contain blank IDs".into()));
        }
        if self.rewards.default_utc_offset_minutes.abs() > crate::clock::MAX_UTC_OFFSET_MINUTES {
            return Err(ProgressError::Config(
                "rewards.default_utc_offset_minutes is out of range".into(),
            ));
        }
        Ok(())
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    /// Get ledger database path
    pub fn database_path(&self) -> PathBuf {
        self.storage_dir.join("progress.db")
    }
}
