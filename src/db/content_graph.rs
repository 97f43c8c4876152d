//! Content graph storage: readers and bulk import
//!
//! Import replaces the whole World -> Chapter -> Lesson hierarchy in one
//! transaction and upserts card definitions. Attempts and unlocks are never
//! touched; they reference content by ID only.

use std::collections::HashSet;
use std::sync::Arc;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::diesel_schema::{card_definitions, chapters, lessons, worlds};
use super::models::{ChapterRow, LessonRow, NewCardDefinition, NewChapter, NewLesson, NewWorld, WorldRow};
use super::ProgressDb;
use crate::content::{sort_siblings, ChapterNode, ContentGraph, LessonNode, WorldNode};
use crate::engine::CardUnlockCondition;
use crate::error::ProgressError;

// ============================================================================
// Import Types
// ============================================================================

/// Content document accepted by `--seed` and [`import_content`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentImport {
    #[serde(default)]
    pub worlds: Vec<WorldImport>,
    #[serde(default)]
    pub cards: Vec<CardImport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldImport {
    pub id: String,
    pub title: String,
    pub order_index: i32,
    #[serde(default)]
    pub chapters: Vec<ChapterImport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterImport {
    pub id: String,
    pub title: String,
    pub order_index: i32,
    #[serde(default)]
    pub lessons: Vec<LessonImport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonImport {
    pub id: String,
    pub title: String,
    pub order_index: i32,
    pub xp_reward: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardImport {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub unlock_condition: CardUnlockCondition,
}

/// Result of an import
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStats {
    pub worlds: usize,
    pub chapters: usize,
    pub lessons: usize,
    pub cards: usize,
}

impl ContentImport {
    pub fn from_json(value: &str) -> Result<Self, ProgressError> {
        Ok(serde_json::from_str(value)?)
    }

    /// Structural checks that the table constraints would otherwise report
    /// as opaque SQLite errors
    pub fn validate(&self) -> Result<(), ProgressError> {
        let mut seen_ids = HashSet::new();
        let mut world_orders = HashSet::new();

        for world in &self.worlds {
            require_id("world", &world.id, &mut seen_ids)?;
            require_unique_order("world", &world.id, world.order_index, &mut world_orders)?;

            let mut chapter_orders = HashSet::new();
            for chapter in &world.chapters {
                require_id("chapter", &chapter.id, &mut seen_ids)?;
                require_unique_order("chapter", &chapter.id, chapter.order_index, &mut chapter_orders)?;

                let mut lesson_orders = HashSet::new();
                for lesson in &chapter.lessons {
                    require_id("lesson", &lesson.id, &mut seen_ids)?;
                    require_unique_order("lesson", &lesson.id, lesson.order_index, &mut lesson_orders)?;
                }
            }
        }

        let mut card_ids = HashSet::new();
        for card in &self.cards {
            require_id("card", &card.id, &mut card_ids)?;
        }
        Ok(())
    }

    fn chapter_ids(&self) -> HashSet<&str> {
        self.worlds
            .iter()
            .flat_map(|w| w.chapters.iter().map(|c| c.id.as_str()))
            .collect()
    }
}

fn require_id(kind: &str, id: &str, seen: &mut HashSet<String>) -> Result<(), ProgressError> {
    if id.trim().is_empty() {
        return Err(ProgressError::InvalidInput(format!("{} id must not be empty", kind)));
    }
    if !seen.insert(id.to_string()) {
        return Err(ProgressError::InvalidInput(format!("duplicate {} id '{}'", kind, id)));
    }
    Ok(())
}

fn require_unique_order(
    kind: &str,
    id: &str,
    order_index: i32,
    seen: &mut HashSet<i32>,
) -> Result<(), ProgressError> {
    if !seen.insert(order_index) {
        return Err(ProgressError::InvalidInput(format!(
            "{} '{}' reuses orderIndex {} within its parent",
            kind, id, order_index
        )));
    }
    Ok(())
}

// ============================================================================
// Read Operations
// ============================================================================

impl From<WorldRow> for WorldNode {
    fn from(row: WorldRow) -> Self {
        WorldNode {
            id: row.id,
            title: row.title,
            order_index: row.order_index,
        }
    }
}

impl From<ChapterRow> for ChapterNode {
    fn from(row: ChapterRow) -> Self {
        ChapterNode {
            id: row.id,
            world_id: row.world_id,
            title: row.title,
            order_index: row.order_index,
        }
    }
}

impl From<LessonRow> for LessonNode {
    fn from(row: LessonRow) -> Self {
        LessonNode {
            id: row.id,
            chapter_id: row.chapter_id,
            title: row.title,
            order_index: row.order_index,
            xp_reward: u32::try_from(row.xp_reward).unwrap_or(0),
        }
    }
}

pub fn get_worlds(conn: &mut SqliteConnection) -> Result<Vec<WorldNode>, ProgressError> {
    let rows: Vec<WorldRow> = worlds::table
        .order((worlds::order_index.asc(), worlds::id.asc()))
        .select(WorldRow::as_select())
        .load(conn)?;
    let mut nodes: Vec<WorldNode> = rows.into_iter().map(Into::into).collect();
    sort_siblings(&mut nodes);
    Ok(nodes)
}

pub fn get_world_chapters(
    conn: &mut SqliteConnection,
    world_id: &str,
) -> Result<Vec<ChapterNode>, ProgressError> {
    let rows: Vec<ChapterRow> = chapters::table
        .filter(chapters::world_id.eq(world_id))
        .order((chapters::order_index.asc(), chapters::id.asc()))
        .select(ChapterRow::as_select())
        .load(conn)?;
    let mut nodes: Vec<ChapterNode> = rows.into_iter().map(Into::into).collect();
    sort_siblings(&mut nodes);
    Ok(nodes)
}

pub fn get_chapter_lessons(
    conn: &mut SqliteConnection,
    chapter_id: &str,
) -> Result<Vec<LessonNode>, ProgressError> {
    let rows: Vec<LessonRow> = lessons::table
        .filter(lessons::chapter_id.eq(chapter_id))
        .order((lessons::order_index.asc(), lessons::id.asc()))
        .select(LessonRow::as_select())
        .load(conn)?;
    let mut nodes: Vec<LessonNode> = rows.into_iter().map(Into::into).collect();
    sort_siblings(&mut nodes);
    Ok(nodes)
}

pub fn get_chapter(
    conn: &mut SqliteConnection,
    chapter_id: &str,
) -> Result<Option<ChapterNode>, ProgressError> {
    Ok(chapters::table
        .filter(chapters::id.eq(chapter_id))
        .select(ChapterRow::as_select())
        .first(conn)
        .optional()?
        .map(Into::into))
}

pub fn get_lesson(
    conn: &mut SqliteConnection,
    lesson_id: &str,
) -> Result<Option<LessonNode>, ProgressError> {
    Ok(lessons::table
        .filter(lessons::id.eq(lesson_id))
        .select(LessonRow::as_select())
        .first(conn)
        .optional()?
        .map(Into::into))
}

// ============================================================================
// Import
// ============================================================================

/// Replace the content graph and upsert cards; run inside a write transaction
pub fn import_content(
    conn: &mut SqliteConnection,
    import: &ContentImport,
    now: &str,
) -> Result<ImportStats, ProgressError> {
    import.validate()?;

    let known_chapters: HashSet<String> = if import.worlds.is_empty() {
        chapters::table.select(chapters::id).load::<String>(conn)?.into_iter().collect()
    } else {
        import.chapter_ids().into_iter().map(str::to_string).collect()
    };
    for card in &import.cards {
        if let Some(chapter_id) = card.unlock_condition.referenced_chapter() {
            if !known_chapters.contains(chapter_id) {
                return Err(ProgressError::InvalidInput(format!(
                    "card '{}' references unknown chapter '{}'",
                    card.id, chapter_id
                )));
            }
        }
    }

    let mut stats = ImportStats::default();

    if !import.worlds.is_empty() {
        diesel::delete(lessons::table).execute(conn)?;
        diesel::delete(chapters::table).execute(conn)?;
        diesel::delete(worlds::table).execute(conn)?;

        for world in &import.worlds {
            diesel::insert_into(worlds::table)
                .values(&NewWorld {
                    id: &world.id,
                    title: &world.title,
                    order_index: world.order_index,
                    created_at: now,
                })
                .execute(conn)?;
            stats.worlds += 1;

            for chapter in &world.chapters {
                diesel::insert_into(chapters::table)
                    .values(&NewChapter {
                        id: &chapter.id,
                        world_id: &world.id,
                        title: &chapter.title,
                        order_index: chapter.order_index,
                        created_at: now,
                    })
                    .execute(conn)?;
                stats.chapters += 1;

                for lesson in &chapter.lessons {
                    let xp_reward = i32::try_from(lesson.xp_reward).map_err(|_| {
                        ProgressError::InvalidInput(format!(
                            "lesson '{}' xpReward is too large",
                            lesson.id
                        ))
                    })?;
                    diesel::insert_into(lessons::table)
                        .values(&NewLesson {
                            id: &lesson.id,
                            chapter_id: &chapter.id,
                            title: &lesson.title,
                            order_index: lesson.order_index,
                            xp_reward,
                            created_at: now,
                        })
                        .execute(conn)?;
                    stats.lessons += 1;
                }
            }
        }
    }

    for card in &import.cards {
        let condition_json = card.unlock_condition.to_json()?;
        diesel::insert_into(card_definitions::table)
            .values(&NewCardDefinition {
                id: &card.id,
                title: &card.title,
                description: &card.description,
                unlock_condition_json: &condition_json,
                created_at: now,
            })
            .on_conflict(card_definitions::id)
            .do_update()
            .set((
                card_definitions::title.eq(&card.title),
                card_definitions::description.eq(&card.description),
                card_definitions::unlock_condition_json.eq(&condition_json),
            ))
            .execute(conn)?;
        stats.cards += 1;
    }

    info!(
        worlds = stats.worlds,
        chapters = stats.chapters,
        lessons = stats.lessons,
        cards = stats.cards,
        "Content imported"
    );
    Ok(stats)
}

// ============================================================================
// ContentGraph over the database
// ============================================================================

/// [`ContentGraph`] reading straight from SQLite
///
/// Each call checks out its own pooled connection; do not call it while
/// holding a connection from the same in-memory pool.
pub struct DbContentGraph {
    db: Arc<ProgressDb>,
}

impl DbContentGraph {
    pub fn new(db: Arc<ProgressDb>) -> Self {
        Self { db }
    }
}

impl ContentGraph for DbContentGraph {
    fn get_worlds(&self) -> Result<Vec<WorldNode>, ProgressError> {
        self.db.with_conn(get_worlds)
    }

    fn get_world_chapters(&self, world_id: &str) -> Result<Vec<ChapterNode>, ProgressError> {
        self.db.with_conn(|conn| get_world_chapters(conn, world_id))
    }

    fn get_chapter_lessons(&self, chapter_id: &str) -> Result<Vec<LessonNode>, ProgressError> {
        self.db.with_conn(|conn| get_chapter_lessons(conn, chapter_id))
    }

    fn get_chapter(&self, chapter_id: &str) -> Result<Option<ChapterNode>, ProgressError> {
        self.db.with_conn(|conn| get_chapter(conn, chapter_id))
    }

    fn get_lesson(&self, lesson_id: &str) -> Result<Option<LessonNode>, ProgressError> {
        self.db.with_conn(|conn| get_lesson(conn, lesson_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentGraphExt;

    const SAMPLE: &str = r#"{
        "worlds": [
            {"id": "w1", "title": "Foundations", "orderIndex": 0, "chapters": [
                {"id": "c1", "title": "The Buddha", "orderIndex": 0, "lessons": [
                    {"id": "l2", "title": "Renunciation", "orderIndex": 1, "xpReward": 10},
                    {"id": "l1", "title": "Birth of Siddhartha", "orderIndex": 0, "xpReward": 10}
                ]},
                {"id": "c2", "title": "Four Noble Truths", "orderIndex": 1, "lessons": []}
            ]}
        ],
        "cards": [
            {"id": "card-first", "title": "First Step", "unlockCondition": {"type": "first_lesson"}},
            {"id": "card-c1", "title": "Awakened", "unlockCondition": {"type": "chapter_complete", "chapterId": "c1"}}
        ]
    }"#;

    #[test]
    fn test_import_and_read_back_sorted() {
        let db = Arc::new(ProgressDb::open_in_memory().unwrap());
        let import = ContentImport::from_json(SAMPLE).unwrap();
        let stats = db
            .write_transaction(|conn| import_content(conn, &import, "2024-01-01T00:00:00Z"))
            .unwrap();
        assert_eq!(stats, ImportStats { worlds: 1, chapters: 2, lessons: 2, cards: 2 });

        let graph = DbContentGraph::new(db);
        let lessons = graph.get_chapter_lessons("c1").unwrap();
        let ids: Vec<_> = lessons.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2"]);
        assert!(graph.get_chapter_lessons("c2").unwrap().is_empty());
        assert_eq!(graph.require_lesson("l2").unwrap().chapter_id, "c1");
        assert!(matches!(graph.require_lesson("nope"), Err(ProgressError::NotFound(_))));
    }

    #[test]
    fn test_reimport_replaces_graph() {
        let db = Arc::new(ProgressDb::open_in_memory().unwrap());
        let import = ContentImport::from_json(SAMPLE).unwrap();
        db.write_transaction(|conn| import_content(conn, &import, "t0")).unwrap();

        let mut smaller = import.clone();
        smaller.worlds[0].chapters.truncate(1);
        smaller.cards.truncate(1);
        db.write_transaction(|conn| import_content(conn, &smaller, "t1")).unwrap();

        let graph = DbContentGraph::new(db);
        assert_eq!(graph.get_world_chapters("w1").unwrap().len(), 1);
        assert!(graph.get_chapter("c2").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_order_index_rejected() {
        let mut import = ContentImport::from_json(SAMPLE).unwrap();
        import.worlds[0].chapters[0].lessons[1].order_index = 1;
        assert!(matches!(import.validate(), Err(ProgressError::InvalidInput(_))));
    }

    #[test]
    fn test_card_referencing_unknown_chapter_rejected() {
        let db = ProgressDb::open_in_memory().unwrap();
        let mut import = ContentImport::from_json(SAMPLE).unwrap();
        import.cards[1].unlock_condition = CardUnlockCondition::ChapterComplete {
            chapter_id: "c9".into(),
        };
        let result = db.write_transaction(|conn| import_content(conn, &import, "t0"));
        assert!(matches!(result, Err(ProgressError::InvalidInput(_))));
    }

    #[test]
    fn test_unknown_condition_kind_fails_parse() {
        let json = r#"{"cards": [{"id": "x", "title": "x", "unlockCondition": {"type": "levitate"}}]}"#;
        assert!(ContentImport::from_json(json).is_err());
    }
}
