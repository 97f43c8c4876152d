//! Service layer for sangha-progress
//!
//! Services hold the progression logic between the HTTP handlers and the
//! repositories. Each service:
//! - validates input before any write
//! - loads content before opening a ledger transaction
//! - emits events after commit
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Services (completion / progress / cards)
//!     ↓
//! Pure rules (engine/*.rs)  +  Repositories (db/*.rs)
//!     ↓
//! SQLite
//! ```

pub mod card_service;
pub mod completion_service;
pub mod events;
pub mod progress_service;
pub mod response;
pub mod retry;

pub use card_service::{CardRetryStats, CardRetryWorker, CardService};
pub use completion_service::{CompletionOutcome, CompletionRequest, CompletionService, StartOutcome};
pub use events::{spawn_logging_listener, EventBus, EventListener, ProgressEvent};
pub use progress_service::ProgressService;
pub use retry::RetryPolicy;

use std::collections::HashSet;
use std::sync::Arc;

use crate::clock::{format_timestamp, Clock, SystemClock};
use crate::config::Config;
use crate::content::{CachedContentGraph, ContentGraph};
use crate::db::content_graph::import_content;
use crate::db::{ContentImport, DbContentGraph, ImportStats, ProgressDb};
use crate::engine::ThresholdLevelCurve;
use crate::error::ProgressError;

/// Service container shared by the HTTP server and the workers
pub struct Services {
    pub completion: Arc<CompletionService>,
    pub progress: Arc<ProgressService>,
    pub cards: Arc<CardService>,
    pub events: Arc<EventBus>,
    pub content: Arc<CachedContentGraph<DbContentGraph>>,
    db: Arc<ProgressDb>,
    clock: Arc<dyn Clock>,
    admin_user_ids: HashSet<String>,
}

impl Services {
    /// Wire every service over one database with the wall clock
    pub fn new(db: Arc<ProgressDb>, config: &Config) -> Self {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Same as [`Services::new`] with an explicit clock (tests drive days by hand)
    pub fn with_clock(db: Arc<ProgressDb>, config: &Config, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(EventBus::new());
        let content = Arc::new(CachedContentGraph::new(Arc::new(DbContentGraph::new(db.clone()))));
        let graph: Arc<dyn ContentGraph> = content.clone();

        let cards = Arc::new(CardService::new(
            db.clone(),
            graph.clone(),
            clock.clone(),
            events.clone(),
            config.card_retry.clone(),
        ));
        let completion = Arc::new(CompletionService::new(
            db.clone(),
            graph.clone(),
            clock.clone(),
            config.rewards.clone(),
            RetryPolicy::from_config(&config.retry),
            cards.clone(),
            events.clone(),
        ));
        let progress = Arc::new(ProgressService::new(
            db.clone(),
            graph,
            clock.clone(),
            config.rewards.clone(),
            Arc::new(ThresholdLevelCurve::default()),
        ));

        Self {
            completion,
            progress,
            cards,
            events,
            content,
            db,
            clock,
            admin_user_ids: config.admin_user_ids.iter().cloned().collect(),
        }
    }

    pub fn db(&self) -> &Arc<ProgressDb> {
        &self.db
    }

    /// Whether the gateway user may call administrative operations
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_user_ids.contains(user_id)
    }

    /// Import a content document and drop the content cache
    pub fn import_content(&self, import: &ContentImport) -> Result<ImportStats, ProgressError> {
        let now = format_timestamp(self.clock.now());
        let stats = self
            .db
            .write_transaction(|conn| import_content(conn, import, &now))?;
        self.content.invalidate();
        self.events.emit(ProgressEvent::ContentImported {
            lessons: stats.lessons,
            cards: stats.cards,
        });
        Ok(stats)
    }
}
