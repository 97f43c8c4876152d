//! Card evaluation outbox
//!
//! A job is written in the same transaction as the ledger update it belongs
//! to, carrying the post-completion snapshot the card conditions are checked
//! against. Successful evaluation deletes it; failures bump `attempts` and
//! push `next_attempt_at` out. A job created under an idempotency key names
//! the receipt that records its unlocked cards.

use diesel::prelude::*;

use super::diesel_schema::card_evaluation_jobs;
use super::models::{CardJobRow, NewCardJob};
use crate::error::ProgressError;

pub fn enqueue(conn: &mut SqliteConnection, job: &NewCardJob<'_>) -> Result<(), ProgressError> {
    diesel::insert_into(card_evaluation_jobs::table)
        .values(job)
        .execute(conn)?;
    Ok(())
}

pub fn get_job(conn: &mut SqliteConnection, job_id: &str) -> Result<Option<CardJobRow>, ProgressError> {
    Ok(card_evaluation_jobs::table
        .filter(card_evaluation_jobs::id.eq(job_id))
        .select(CardJobRow::as_select())
        .first::<CardJobRow>(conn)
        .optional()?)
}

/// Jobs whose `next_attempt_at <= now`, oldest first, below the attempt cap
pub fn due_jobs(
    conn: &mut SqliteConnection,
    now: &str,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<CardJobRow>, ProgressError> {
    Ok(card_evaluation_jobs::table
        .filter(card_evaluation_jobs::next_attempt_at.le(now))
        .filter(card_evaluation_jobs::attempts.lt(max_attempts))
        .order((card_evaluation_jobs::next_attempt_at.asc(), card_evaluation_jobs::id.asc()))
        .limit(limit)
        .select(CardJobRow::as_select())
        .load(conn)?)
}

/// `true` if this call removed the job (another evaluator may have won)
pub fn delete_job(conn: &mut SqliteConnection, job_id: &str) -> Result<bool, ProgressError> {
    let deleted = diesel::delete(card_evaluation_jobs::table.filter(card_evaluation_jobs::id.eq(job_id)))
        .execute(conn)?;
    Ok(deleted == 1)
}

pub fn record_failure(
    conn: &mut SqliteConnection,
    job_id: &str,
    error: &str,
    next_attempt_at: &str,
) -> Result<(), ProgressError> {
    diesel::update(card_evaluation_jobs::table.filter(card_evaluation_jobs::id.eq(job_id)))
        .set((
            card_evaluation_jobs::attempts.eq(card_evaluation_jobs::attempts + 1),
            card_evaluation_jobs::last_error.eq(Some(error)),
            card_evaluation_jobs::next_attempt_at.eq(next_attempt_at),
        ))
        .execute(conn)?;
    Ok(())
}

pub fn count_pending(conn: &mut SqliteConnection) -> Result<i64, ProgressError> {
    Ok(card_evaluation_jobs::table.count().get_result(conn)?)
}
