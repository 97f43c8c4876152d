//! Completion receipts: idempotency tokens and their stored reward summary

use diesel::prelude::*;

use super::diesel_schema::completion_receipts;
use super::models::{CompletionReceiptRow, NewCompletionReceipt};
use crate::error::ProgressError;

pub fn find_receipt(
    conn: &mut SqliteConnection,
    user_id: &str,
    idempotency_key: &str,
) -> Result<Option<CompletionReceiptRow>, ProgressError> {
    Ok(completion_receipts::table
        .filter(completion_receipts::user_id.eq(user_id))
        .filter(completion_receipts::idempotency_key.eq(idempotency_key))
        .select(CompletionReceiptRow::as_select())
        .first::<CompletionReceiptRow>(conn)
        .optional()?)
}

pub fn insert_receipt(
    conn: &mut SqliteConnection,
    receipt: &NewCompletionReceipt<'_>,
) -> Result<(), ProgressError> {
    diesel::insert_into(completion_receipts::table)
        .values(receipt)
        .execute(conn)?;
    Ok(())
}

/// Replace the stored summary; card evaluation folds its unlocks in
pub fn update_summary(
    conn: &mut SqliteConnection,
    user_id: &str,
    idempotency_key: &str,
    summary_json: &str,
) -> Result<(), ProgressError> {
    diesel::update(
        completion_receipts::table
            .filter(completion_receipts::user_id.eq(user_id))
            .filter(completion_receipts::idempotency_key.eq(idempotency_key)),
    )
    .set(completion_receipts::summary_json.eq(summary_json))
    .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProgressDb;

    #[test]
    fn test_receipt_scoped_by_user() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            insert_receipt(
                conn,
                &NewCompletionReceipt {
                    user_id: "u1",
                    idempotency_key: "k1",
                    lesson_id: "l1",
                    attempt_mode: "normal",
                    summary_json: "{}",
                    created_at: "2024-01-01T00:00:00Z",
                },
            )?;
            assert!(find_receipt(conn, "u1", "k1")?.is_some());
            assert!(find_receipt(conn, "u2", "k1")?.is_none());

            update_summary(conn, "u1", "k1", r#"{"xpEarned":10}"#)?;
            assert_eq!(find_receipt(conn, "u1", "k1")?.unwrap().summary_json, r#"{"xpEarned":10}"#);
            Ok(())
        })
        .unwrap();
    }
}
