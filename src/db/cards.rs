//! Card catalogue and per-user unlocks
//!
//! Unlocks are insert-if-absent on the `(user_id, card_id)` primary key, so
//! concurrent evaluations of the same condition record exactly one row.

use std::collections::HashSet;

use diesel::prelude::*;

use super::diesel_schema::{card_definitions, user_card_unlocks};
use super::models::{CardDefinitionRow, NewUserCardUnlock, UserCardUnlockRow};
use crate::engine::{CardDefinition, CardUnlockCondition};
use crate::error::ProgressError;

impl TryFrom<CardDefinitionRow> for CardDefinition {
    type Error = ProgressError;

    fn try_from(row: CardDefinitionRow) -> Result<Self, Self::Error> {
        let unlock_condition = CardUnlockCondition::from_json(&row.unlock_condition_json)
            .map_err(|e| {
                ProgressError::Internal(format!(
                    "Card '{}' has an unreadable unlock condition: {}",
                    row.id, e
                ))
            })?;
        Ok(CardDefinition {
            id: row.id,
            title: row.title,
            description: row.description,
            unlock_condition,
        })
    }
}

/// Every card definition, ordered by ID
pub fn list_definitions(conn: &mut SqliteConnection) -> Result<Vec<CardDefinition>, ProgressError> {
    card_definitions::table
        .order(card_definitions::id.asc())
        .select(CardDefinitionRow::as_select())
        .load::<CardDefinitionRow>(conn)?
        .into_iter()
        .map(CardDefinition::try_from)
        .collect()
}

pub fn unlocked_card_ids(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<HashSet<String>, ProgressError> {
    Ok(user_card_unlocks::table
        .filter(user_card_unlocks::user_id.eq(user_id))
        .select(user_card_unlocks::card_id)
        .load::<String>(conn)?
        .into_iter()
        .collect())
}

pub fn list_unlocks(
    conn: &mut SqliteConnection,
    user_id: &str,
) -> Result<Vec<UserCardUnlockRow>, ProgressError> {
    Ok(user_card_unlocks::table
        .filter(user_card_unlocks::user_id.eq(user_id))
        .order((user_card_unlocks::unlocked_at.asc(), user_card_unlocks::card_id.asc()))
        .select(UserCardUnlockRow::as_select())
        .load(conn)?)
}

/// Record an unlock unless it already exists; `true` if this call inserted it
pub fn insert_unlock_if_absent(
    conn: &mut SqliteConnection,
    unlock: &NewUserCardUnlock<'_>,
) -> Result<bool, ProgressError> {
    let inserted = diesel::insert_or_ignore_into(user_card_unlocks::table)
        .values(unlock)
        .execute(conn)?;
    Ok(inserted == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProgressDb;
    use diesel::connection::SimpleConnection;

    #[test]
    fn test_insert_once() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let unlock = NewUserCardUnlock {
                user_id: "u1",
                card_id: "card-first",
                unlocked_at: "2024-01-01T00:00:00Z",
                source_lesson_id: Some("l1"),
            };
            assert!(insert_unlock_if_absent(conn, &unlock)?);
            assert!(!insert_unlock_if_absent(conn, &unlock)?);
            assert_eq!(list_unlocks(conn, "u1")?.len(), 1);
            assert!(unlocked_card_ids(conn, "u1")?.contains("card-first"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_unreadable_condition_is_an_error() {
        let db = ProgressDb::open_in_memory().unwrap();
        db.with_conn(|conn| {
            conn.batch_execute(
                "INSERT INTO card_definitions (id, title, description, unlock_condition_json, created_at)
                 VALUES ('broken', 'Broken', '', 'not json', '2024-01-01T00:00:00Z')",
            )?;
            assert!(list_definitions(conn).is_err());
            Ok(())
        })
        .unwrap();
    }
}
