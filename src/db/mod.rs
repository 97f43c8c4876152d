//! SQLite ledger storage
//!
//! ## Tables
//!
//! - `worlds`, `chapters`, `lessons` - content graph (read-only for the engine)
//! - `lesson_attempts` - one row per (user, lesson)
//! - `gamification_profiles` - one row per user
//! - `completion_receipts` - idempotency tokens with their stored reward summary
//! - `card_definitions`, `user_card_unlocks` - card catalogue and insert-once unlocks
//! - `card_evaluation_jobs` - post-commit card evaluation outbox
//!
//! Every ledger write goes through [`ProgressDb::write_transaction`], which
//! opens `BEGIN IMMEDIATE` so the write lock is taken before the first read.

pub mod card_jobs;
pub mod cards;
pub mod content_graph;
pub mod context;
pub mod diesel_schema;
pub mod lesson_attempts;
pub mod models;
pub mod profiles;
pub mod receipts;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ProgressError;

pub use content_graph::{ContentImport, DbContentGraph, ImportStats};
pub use context::UserContext;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas applied when the pool hands out a fresh connection
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout_ms: u64,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Pooled SQLite database holding the content graph and both ledgers
pub struct ProgressDb {
    pool: DbPool,
}

impl ProgressDb {
    /// Open or create the ledger database at `db_path`
    pub fn open(db_path: &Path, pool_size: u32, busy_timeout_ms: u64) -> Result<Self, ProgressError> {
        info!("Opening SQLite database at {:?}", db_path);

        let url = db_path.to_string_lossy().to_string();

        // Journal mode is persistent, so switch it once before the pool opens
        {
            let mut conn = SqliteConnection::establish(&url).map_err(|e| {
                ProgressError::Internal(format!("Failed to open SQLite: {}", e))
            })?;
            conn.batch_execute(&format!(
                "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL;",
                busy_timeout_ms
            ))
            .map_err(|e| ProgressError::Internal(format!("Failed to set PRAGMA: {}", e)))?;
            schema::init_schema(&mut conn)?;
        }

        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(Duration::from_millis(busy_timeout_ms.max(250) * 4))
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms }))
            .build(ConnectionManager::<SqliteConnection>::new(url))?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (for testing)
    ///
    /// Every SQLite `:memory:` connection is its own database, so the pool
    /// holds exactly one connection that never expires. Callers must not
    /// request a second connection while holding the first.
    pub fn open_in_memory() -> Result<Self, ProgressError> {
        debug!("Opening in-memory SQLite database");

        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .connection_timeout(Duration::from_secs(5))
            .connection_customizer(Box::new(ConnectionOptions { busy_timeout_ms: 0 }))
            .build(ConnectionManager::<SqliteConnection>::new(":memory:"))?;

        let db = Self { pool };
        db.with_conn(schema::init_schema)?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<PooledConn, ProgressError> {
        Ok(self.pool.get()?)
    }

    /// Run a read (or single-statement write) on a pooled connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, ProgressError>,
    {
        let mut conn = self.conn()?;
        f(&mut conn)
    }

    /// Run `f` inside `BEGIN IMMEDIATE ... COMMIT`; any error rolls back
    pub fn write_transaction<F, T>(&self, f: F) -> Result<T, ProgressError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, ProgressError>,
    {
        let mut conn = self.conn()?;
        conn.immediate_transaction(f)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, ProgressError> {
        use diesel::dsl::count_star;
        use diesel_schema::*;

        self.with_conn(|conn| {
            Ok(DbStats {
                lesson_count: lessons::table.select(count_star()).first::<i64>(conn)? as u64,
                attempt_count: lesson_attempts::table.select(count_star()).first::<i64>(conn)?
                    as u64,
                profile_count: gamification_profiles::table
                    .select(count_star())
                    .first::<i64>(conn)? as u64,
                card_unlock_count: user_card_unlocks::table
                    .select(count_star())
                    .first::<i64>(conn)? as u64,
                pending_card_jobs: card_evaluation_jobs::table
                    .select(count_star())
                    .first::<i64>(conn)? as u64,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbStats {
    pub lesson_count: u64,
    pub attempt_count: u64,
    pub profile_count: u64,
    pub card_unlock_count: u64,
    pub pending_card_jobs: u64,
}
