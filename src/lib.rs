//! Sangha Progress - progress and unlock engine for the Sangha learning app
//!
//! Decides which lessons a learner may play, records completions exactly
//! once, credits XP, streaks and daily goals, and unlocks collectible
//! teaching cards.
//!
//! ## Architecture
//!
//! - **Content graph** (`content`): World -> Chapter -> Lesson, read-only here
//! - **Rules** (`engine`): pure gating, reward and card-matching logic
//! - **Ledgers** (`db`): SQLite attempts, profiles, receipts and card unlocks
//! - **Services** (`services`): transactions, retries, events, card outbox
//! - **HTTP** (`http`): hyper API consumed through the gateway
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/sangha-progress/
//! ├── progress.db            # SQLite (WAL) ledgers and content graph
//! └── config.toml            # Configuration
//! ```

pub mod clock;
pub mod config;
pub mod content;
pub mod db;
pub mod engine;
pub mod error;
pub mod http;
pub mod services;
pub mod views;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use db::{ContentImport, ProgressDb, UserContext};
pub use error::ProgressError;
pub use http::HttpServer;
pub use services::{CardRetryWorker, CompletionRequest, Services, StartOutcome};
pub use views::RewardSummary;
