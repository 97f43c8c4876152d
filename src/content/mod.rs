//! Content graph: World -> Chapter -> Lesson
//!
//! The graph is owned by the content-authoring side and is read-only for the
//! engine. Every node carries an `order_index` unique within its parent;
//! readers always return children sorted by `(order_index, id)` so that ties
//! (a caller error) still produce a deterministic order.

pub mod cache;

use serde::{Deserialize, Serialize};

use crate::error::ProgressError;

pub use cache::CachedContentGraph;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldNode {
    pub id: String,
    pub title: String,
    pub order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterNode {
    pub id: String,
    pub world_id: String,
    pub title: String,
    pub order_index: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonNode {
    pub id: String,
    pub chapter_id: String,
    pub title: String,
    pub order_index: i32,
    /// XP for a first-time normal completion
    pub xp_reward: u32,
}

/// Anything sequenced within a parent
pub trait Ordered {
    fn order_index(&self) -> i32;
    fn node_id(&self) -> &str;
}

impl Ordered for WorldNode {
    fn order_index(&self) -> i32 {
        self.order_index
    }
    fn node_id(&self) -> &str {
        &self.id
    }
}

impl Ordered for ChapterNode {
    fn order_index(&self) -> i32 {
        self.order_index
    }
    fn node_id(&self) -> &str {
        &self.id
    }
}

impl Ordered for LessonNode {
    fn order_index(&self) -> i32 {
        self.order_index
    }
    fn node_id(&self) -> &str {
        &self.id
    }
}

/// Sort siblings by `(order_index, id)`
pub fn sort_siblings<T: Ordered>(nodes: &mut [T]) {
    nodes.sort_by(|a, b| {
        a.order_index()
            .cmp(&b.order_index())
            .then_with(|| a.node_id().cmp(b.node_id()))
    });
}

/// Read access to the content hierarchy
///
/// Collection readers return siblings already sorted with [`sort_siblings`].
pub trait ContentGraph: Send + Sync {
    fn get_worlds(&self) -> Result<Vec<WorldNode>, ProgressError>;

    fn get_world_chapters(&self, world_id: &str) -> Result<Vec<ChapterNode>, ProgressError>;

    fn get_chapter_lessons(&self, chapter_id: &str) -> Result<Vec<LessonNode>, ProgressError>;

    fn get_chapter(&self, chapter_id: &str) -> Result<Option<ChapterNode>, ProgressError>;

    fn get_lesson(&self, lesson_id: &str) -> Result<Option<LessonNode>, ProgressError>;
}

/// Lookup helpers that turn a miss into `NotFound`
pub trait ContentGraphExt: ContentGraph {
    fn require_lesson(&self, lesson_id: &str) -> Result<LessonNode, ProgressError> {
        self.get_lesson(lesson_id)?
            .ok_or_else(|| ProgressError::NotFound(format!("Lesson '{}' not found", lesson_id)))
    }

    fn require_chapter(&self, chapter_id: &str) -> Result<ChapterNode, ProgressError> {
        self.get_chapter(chapter_id)?
            .ok_or_else(|| ProgressError::NotFound(format!("Chapter '{}' not found", chapter_id)))
    }

    fn require_world(&self, world_id: &str) -> Result<WorldNode, ProgressError> {
        self.get_worlds()?
            .into_iter()
            .find(|w| w.id == world_id)
            .ok_or_else(|| ProgressError::NotFound(format!("World '{}' not found", world_id)))
    }
}

impl<G: ContentGraph + ?Sized> ContentGraphExt for G {}
