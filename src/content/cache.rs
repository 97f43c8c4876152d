//! Read-through hot cache over a content graph
//!
//! Content is immutable within a session, so lookups are cached until the
//! next import calls [`CachedContentGraph::invalidate`]. Misses are not
//! cached: a lesson that does not exist yet may be imported later.
//!
//! Every fill is tagged with the generation it started under. A fill that
//! raced an invalidation removes itself again, so a read of the old graph
//! never outlives the import that replaced it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::debug;

use super::{ChapterNode, ContentGraph, LessonNode, WorldNode};
use crate::error::ProgressError;

pub struct CachedContentGraph<G: ContentGraph> {
    inner: Arc<G>,
    generation: AtomicU64,
    worlds: RwLock<Option<Vec<WorldNode>>>,
    world_chapters: DashMap<String, Vec<ChapterNode>>,
    chapter_lessons: DashMap<String, Vec<LessonNode>>,
    chapters: DashMap<String, ChapterNode>,
    lessons: DashMap<String, LessonNode>,
}

impl<G: ContentGraph> CachedContentGraph<G> {
    pub fn new(inner: Arc<G>) -> Self {
        Self {
            inner,
            generation: AtomicU64::new(0),
            worlds: RwLock::new(None),
            world_chapters: DashMap::new(),
            chapter_lessons: DashMap::new(),
            chapters: DashMap::new(),
            lessons: DashMap::new(),
        }
    }

    /// Drop every cached node (call after content import)
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.worlds.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.world_chapters.clear();
        self.chapter_lessons.clear();
        self.chapters.clear();
        self.lessons.clear();
        debug!("Content graph cache invalidated");
    }

    /// Number of cached lesson lists (for health output)
    pub fn cached_chapter_count(&self) -> usize {
        self.chapter_lessons.len()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Insert a value read under `generation`, undoing it if an invalidation raced the read
    fn fill<V>(&self, map: &DashMap<String, V>, key: &str, value: V, generation: u64) {
        map.insert(key.to_string(), value);
        if self.current_generation() != generation {
            map.remove(key);
        }
    }
}

impl<G: ContentGraph> ContentGraph for CachedContentGraph<G> {
    fn get_worlds(&self) -> Result<Vec<WorldNode>, ProgressError> {
        if let Some(worlds) = self.worlds.read().unwrap_or_else(|e| e.into_inner()).as_ref() {
            return Ok(worlds.clone());
        }
        let generation = self.current_generation();
        let worlds = self.inner.get_worlds()?;
        let mut slot = self.worlds.write().unwrap_or_else(|e| e.into_inner());
        if self.current_generation() == generation {
            *slot = Some(worlds.clone());
        }
        Ok(worlds)
    }

    fn get_world_chapters(&self, world_id: &str) -> Result<Vec<ChapterNode>, ProgressError> {
        if let Some(chapters) = self.world_chapters.get(world_id) {
            return Ok(chapters.clone());
        }
        let generation = self.current_generation();
        let chapters = self.inner.get_world_chapters(world_id)?;
        self.fill(&self.world_chapters, world_id, chapters.clone(), generation);
        Ok(chapters)
    }

    fn get_chapter_lessons(&self, chapter_id: &str) -> Result<Vec<LessonNode>, ProgressError> {
        if let Some(lessons) = self.chapter_lessons.get(chapter_id) {
            return Ok(lessons.clone());
        }
        let generation = self.current_generation();
        let lessons = self.inner.get_chapter_lessons(chapter_id)?;
        self.fill(&self.chapter_lessons, chapter_id, lessons.clone(), generation);
        Ok(lessons)
    }

    fn get_chapter(&self, chapter_id: &str) -> Result<Option<ChapterNode>, ProgressError> {
        if let Some(chapter) = self.chapters.get(chapter_id) {
            return Ok(Some(chapter.clone()));
        }
        let generation = self.current_generation();
        let chapter = self.inner.get_chapter(chapter_id)?;
        if let Some(ref c) = chapter {
            self.fill(&self.chapters, chapter_id, c.clone(), generation);
        }
        Ok(chapter)
    }

    fn get_lesson(&self, lesson_id: &str) -> Result<Option<LessonNode>, ProgressError> {
        if let Some(lesson) = self.lessons.get(lesson_id) {
            return Ok(Some(lesson.clone()));
        }
        let generation = self.current_generation();
        let lesson = self.inner.get_lesson(lesson_id)?;
        if let Some(ref l) = lesson {
            self.fill(&self.lessons, lesson_id, l.clone(), generation);
        }
        Ok(lesson)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{OnceLock, Weak};

    /// Graph with one chapter that counts how often it is hit
    #[derive(Default)]
    struct CountingGraph {
        lesson_reads: AtomicUsize,
    }

    impl ContentGraph for CountingGraph {
        fn get_worlds(&self) -> Result<Vec<WorldNode>, ProgressError> {
            Ok(vec![])
        }

        fn get_world_chapters(&self, _world_id: &str) -> Result<Vec<ChapterNode>, ProgressError> {
            Ok(vec![])
        }

        fn get_chapter_lessons(&self, chapter_id: &str) -> Result<Vec<LessonNode>, ProgressError> {
            self.lesson_reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![LessonNode {
                id: "l1".into(),
                chapter_id: chapter_id.into(),
                title: "Four Noble Truths".into(),
                order_index: 0,
                xp_reward: 10,
            }])
        }

        fn get_chapter(&self, _chapter_id: &str) -> Result<Option<ChapterNode>, ProgressError> {
            Ok(None)
        }

        fn get_lesson(&self, _lesson_id: &str) -> Result<Option<LessonNode>, ProgressError> {
            Ok(None)
        }
    }

    #[test]
    fn test_lessons_cached_until_invalidated() {
        let inner = Arc::new(CountingGraph::default());
        let cache = CachedContentGraph::new(inner.clone());

        cache.get_chapter_lessons("c1").unwrap();
        cache.get_chapter_lessons("c1").unwrap();
        assert_eq!(inner.lesson_reads.load(Ordering::SeqCst), 1);

        cache.invalidate();
        cache.get_chapter_lessons("c1").unwrap();
        assert_eq!(inner.lesson_reads.load(Ordering::SeqCst), 2);
    }

    /// Inner graph that lets an import land while a read is in flight
    #[derive(Default)]
    struct RacingGraph {
        cache: OnceLock<Weak<CachedContentGraph<RacingGraph>>>,
        import_during_read: AtomicBool,
    }

    impl RacingGraph {
        fn maybe_import(&self) {
            if self.import_during_read.swap(false, Ordering::SeqCst) {
                if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
                    cache.invalidate();
                }
            }
        }
    }

    impl ContentGraph for RacingGraph {
        fn get_worlds(&self) -> Result<Vec<WorldNode>, ProgressError> {
            self.maybe_import();
            Ok(vec![WorldNode {
                id: "w-old".into(),
                title: "Old".into(),
                order_index: 0,
            }])
        }

        fn get_world_chapters(&self, _world_id: &str) -> Result<Vec<ChapterNode>, ProgressError> {
            Ok(vec![])
        }

        fn get_chapter_lessons(&self, chapter_id: &str) -> Result<Vec<LessonNode>, ProgressError> {
            self.maybe_import();
            Ok(vec![LessonNode {
                id: "l-old".into(),
                chapter_id: chapter_id.into(),
                title: "Old".into(),
                order_index: 0,
                xp_reward: 10,
            }])
        }

        fn get_chapter(&self, _chapter_id: &str) -> Result<Option<ChapterNode>, ProgressError> {
            Ok(None)
        }

        fn get_lesson(&self, _lesson_id: &str) -> Result<Option<LessonNode>, ProgressError> {
            Ok(None)
        }
    }

    #[test]
    fn test_fill_racing_invalidation_is_dropped() {
        let inner = Arc::new(RacingGraph::default());
        let cache = Arc::new(CachedContentGraph::new(inner.clone()));
        inner.cache.set(Arc::downgrade(&cache)).unwrap();

        inner.import_during_read.store(true, Ordering::SeqCst);
        cache.get_chapter_lessons("c1").unwrap();
        assert_eq!(cache.cached_chapter_count(), 0);

        inner.import_during_read.store(true, Ordering::SeqCst);
        cache.get_worlds().unwrap();
        assert!(cache.worlds.read().unwrap().is_none());

        // Without a concurrent import the fill sticks
        cache.get_chapter_lessons("c1").unwrap();
        assert_eq!(cache.cached_chapter_count(), 1);
    }

    #[test]
    fn test_misses_are_not_cached() {
        let cache = CachedContentGraph::new(Arc::new(CountingGraph::default()));
        assert!(cache.get_lesson("missing").unwrap().is_none());
        assert_eq!(cache.lessons.len(), 0);
    }
}
