//! Reference in-process store: three primary tables, three secondary
//! indices, one reader/writer lock.
//!
//! Search is a linear scan with a word-overlap score. Results are deep
//! copies; callers can never mutate stored records through them.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::MemoryError;
use crate::types::{generate_id, Entity, Memory, MemoryType, Relationship};

/// Filters and bounds for [`InMemoryStore::search`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub memory_type: Option<MemoryType>,
    pub category: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    /// Matches scoring below this are dropped
    pub min_score: f64,
    /// Maximum results returned; 0 means no limit
    pub top_k: usize,
}

/// A match from [`InMemoryStore::search`], scored in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub memory: Memory,
    pub score: f64,
}

/// Sort key for [`InMemoryStore::get_by_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
    Importance,
    AccessCount,
}

/// Paging and ordering for [`InMemoryStore::get_by_user`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub sort_by: SortField,
    pub descending: bool,
    pub offset: usize,
    /// 0 means no limit
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            sort_by: SortField::CreatedAt,
            descending: true,
            offset: 0,
            limit: 0,
        }
    }
}

#[derive(Default)]
struct StoreInner {
    memories: HashMap<String, Memory>,
    entities: HashMap<String, Entity>,
    relationships: HashMap<String, Relationship>,
    by_user: HashMap<String, Vec<String>>,
    by_session: HashMap<String, Vec<String>>,
    by_entity: HashMap<String, Vec<String>>,
}

/// In-process reference store. All three tables share a single
/// reader/writer lock; production backends may shard.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_memory(&self, mut memory: Memory) -> Result<Memory, MemoryError> {
        if memory.user_id.is_empty() {
            return Err(MemoryError::Validation {
                message: "memory requires a user_id".to_string(),
            });
        }
        if memory.id.is_empty() {
            memory.id = generate_id();
        }

        let mut inner = self.write();
        index_insert(&mut inner.by_user, &memory.user_id, &memory.id);
        if !memory.session_id.is_empty() {
            index_insert(&mut inner.by_session, &memory.session_id, &memory.id);
        }
        inner.memories.insert(memory.id.clone(), memory.clone());
        Ok(memory)
    }

    /// Fetch by id. Counts as an access: bumps `access_count` and
    /// `last_access` under the write lock.
    pub fn get_memory(&self, id: &str) -> Result<Memory, MemoryError> {
        let mut inner = self.write();
        let memory = inner
            .memories
            .get_mut(id)
            .ok_or_else(|| MemoryError::NotFound { id: id.to_string() })?;
        memory.access_count += 1;
        memory.last_access = Utc::now();
        Ok(memory.clone())
    }

    /// Replace an existing memory, reindexing if its owner or session
    /// changed.
    pub fn update_memory(&self, memory: Memory) -> Result<(), MemoryError> {
        let mut inner = self.write();
        let previous = inner
            .memories
            .get(&memory.id)
            .ok_or_else(|| MemoryError::NotFound {
                id: memory.id.clone(),
            })?
            .clone();

        if previous.user_id != memory.user_id {
            index_remove(&mut inner.by_user, &previous.user_id, &memory.id);
            index_insert(&mut inner.by_user, &memory.user_id, &memory.id);
        }
        if previous.session_id != memory.session_id {
            if !previous.session_id.is_empty() {
                index_remove(&mut inner.by_session, &previous.session_id, &memory.id);
            }
            if !memory.session_id.is_empty() {
                index_insert(&mut inner.by_session, &memory.session_id, &memory.id);
            }
        }
        inner.memories.insert(memory.id.clone(), memory);
        Ok(())
    }

    /// Insert or replace without a prior-existence requirement. Used
    /// when applying remote events.
    pub fn upsert_memory(&self, memory: Memory) -> Result<Memory, MemoryError> {
        if self.update_memory(memory.clone()).is_ok() {
            return Ok(memory);
        }
        self.add_memory(memory)
    }

    pub fn delete_memory(&self, id: &str) -> Result<Memory, MemoryError> {
        self.remove_memory(id)
            .ok_or_else(|| MemoryError::NotFound { id: id.to_string() })
    }

    /// Idempotent removal; `None` when the memory was already absent.
    pub fn remove_memory(&self, id: &str) -> Option<Memory> {
        let mut inner = self.write();
        let memory = inner.memories.remove(id)?;
        index_remove(&mut inner.by_user, &memory.user_id, id);
        if !memory.session_id.is_empty() {
            index_remove(&mut inner.by_session, &memory.session_id, id);
        }
        Some(memory)
    }

    pub fn contains_memory(&self, id: &str) -> bool {
        self.read().memories.contains_key(id)
    }

    /// Peek without counting an access.
    pub fn peek_memory(&self, id: &str) -> Option<Memory> {
        self.read().memories.get(id).cloned()
    }

    pub fn memory_count(&self) -> usize {
        self.read().memories.len()
    }

    /// Linear scan over all memories: filters, word-overlap score,
    /// `min_score` floor, descending sort, `top_k` cut.
    pub fn search(&self, options: &SearchOptions) -> Vec<SearchResult> {
        let inner = self.read();
        let query_words: Vec<String> = options
            .query
            .to_lowercase()
            .split_whitespace()
            .map(|w| w.to_string())
            .collect();

        let mut results: Vec<SearchResult> = inner
            .memories
            .values()
            .filter(|m| matches_filters(m, options))
            .filter_map(|m| {
                let score = overlap_score(&query_words, &m.content);
                if score < options.min_score {
                    None
                } else {
                    Some(SearchResult {
                        memory: m.clone(),
                        score,
                    })
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.updated_at.cmp(&a.memory.updated_at))
        });
        if options.top_k > 0 {
            results.truncate(options.top_k);
        }
        results
    }

    /// All memories owned by `user_id`, ordered and paged. An offset
    /// past the end yields an empty page, not an error.
    pub fn get_by_user(&self, user_id: &str, options: &ListOptions) -> Vec<Memory> {
        let inner = self.read();
        let ids = match inner.by_user.get(user_id) {
            Some(ids) => ids,
            None => return Vec::new(),
        };

        let mut memories: Vec<Memory> = ids
            .iter()
            .filter_map(|id| inner.memories.get(id).cloned())
            .collect();

        memories.sort_by(|a, b| {
            let ordering = match options.sort_by {
                SortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                SortField::Importance => a
                    .importance
                    .partial_cmp(&b.importance)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SortField::AccessCount => a.access_count.cmp(&b.access_count),
            };
            if options.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        if options.offset >= memories.len() {
            return Vec::new();
        }
        let mut page = memories.split_off(options.offset);
        std::mem::swap(&mut memories, &mut page);
        if options.limit > 0 {
            memories.truncate(options.limit);
        }
        memories
    }

    pub fn get_by_session(&self, session_id: &str) -> Vec<Memory> {
        let inner = self.read();
        inner
            .by_session
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.memories.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn add_entity(&self, mut entity: Entity) -> Result<Entity, MemoryError> {
        if entity.id.is_empty() {
            entity.id = generate_id();
        }
        self.write().entities.insert(entity.id.clone(), entity.clone());
        Ok(entity)
    }

    pub fn get_entity(&self, id: &str) -> Result<Entity, MemoryError> {
        self.read()
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound { id: id.to_string() })
    }

    pub fn delete_entity(&self, id: &str) -> Option<Entity> {
        let mut inner = self.write();
        let entity = inner.entities.remove(id)?;
        // Edges touching the entity go with it.
        let edge_ids = inner.by_entity.remove(id).unwrap_or_default();
        for edge_id in edge_ids {
            if let Some(edge) = inner.relationships.remove(&edge_id) {
                let other = if edge.source_id == id {
                    edge.target_id.clone()
                } else {
                    edge.source_id.clone()
                };
                index_remove(&mut inner.by_entity, &other, &edge_id);
            }
        }
        Some(entity)
    }

    /// Case-insensitive substring match on entity name; `limit` of 0
    /// means unbounded.
    pub fn search_entities(&self, name_query: &str, limit: usize) -> Vec<Entity> {
        let needle = name_query.to_lowercase();
        let inner = self.read();
        let mut found: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        if limit > 0 {
            found.truncate(limit);
        }
        found
    }

    pub fn add_relationship(&self, mut edge: Relationship) -> Result<Relationship, MemoryError> {
        if edge.id.is_empty() {
            edge.id = generate_id();
        }
        let mut inner = self.write();
        index_insert(&mut inner.by_entity, &edge.source_id, &edge.id);
        index_insert(&mut inner.by_entity, &edge.target_id, &edge.id);
        inner.relationships.insert(edge.id.clone(), edge.clone());
        Ok(edge)
    }

    pub fn delete_relationship(&self, id: &str) -> Option<Relationship> {
        let mut inner = self.write();
        let edge = inner.relationships.remove(id)?;
        index_remove(&mut inner.by_entity, &edge.source_id, id);
        index_remove(&mut inner.by_entity, &edge.target_id, id);
        Some(edge)
    }

    /// Every edge touching the entity, whichever end it is on.
    pub fn relationships_for_entity(&self, entity_id: &str) -> Vec<Relationship> {
        let inner = self.read();
        inner
            .by_entity
            .get(entity_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.relationships.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn matches_filters(memory: &Memory, options: &SearchOptions) -> bool {
    if let Some(user_id) = &options.user_id {
        if &memory.user_id != user_id {
            return false;
        }
    }
    if let Some(session_id) = &options.session_id {
        if &memory.session_id != session_id {
            return false;
        }
    }
    if let Some(memory_type) = options.memory_type {
        if memory.memory_type != memory_type {
            return false;
        }
    }
    if let Some(category) = &options.category {
        if &memory.category != category {
            return false;
        }
    }
    if let Some(after) = options.after {
        if memory.created_at < after {
            return false;
        }
    }
    if let Some(before) = options.before {
        if memory.created_at > before {
            return false;
        }
    }
    true
}

/// Fraction of query words found in the content, case-insensitive
/// substring matching. An empty query matches everything at 1.0.
fn overlap_score(query_words: &[String], content: &str) -> f64 {
    if query_words.is_empty() {
        return 1.0;
    }
    let haystack = content.to_lowercase();
    let hits = query_words
        .iter()
        .filter(|w| haystack.contains(w.as_str()))
        .count();
    hits as f64 / query_words.len() as f64
}

fn index_insert(index: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
    let ids = index.entry(key.to_string()).or_default();
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn index_remove(index: &mut HashMap<String, Vec<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.retain(|existing| existing != id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    fn store_with(memories: Vec<Memory>) -> InMemoryStore {
        let store = InMemoryStore::new();
        for memory in memories {
            store.add_memory(memory).unwrap();
        }
        store
    }

    #[test]
    fn add_assigns_id_when_missing() {
        let store = InMemoryStore::new();
        let mut memory = Memory::new("user-1", "hello");
        memory.id = String::new();
        let stored = store.add_memory(memory).unwrap();
        assert!(!stored.id.is_empty());
        assert!(store.contains_memory(&stored.id));
    }

    #[test]
    fn get_counts_accesses() {
        let store = store_with(vec![Memory::new("user-1", "hello")]);
        let id = store.get_by_user("user-1", &ListOptions::default())[0]
            .id
            .clone();
        store.get_memory(&id).unwrap();
        let memory = store.get_memory(&id).unwrap();
        assert_eq!(memory.access_count, 2);
    }

    #[test]
    fn delete_cleans_indices() {
        let store =
            store_with(vec![Memory::new("user-1", "hello").with_session("session-1")]);
        let id = store.get_by_session("session-1")[0].id.clone();
        store.delete_memory(&id).unwrap();
        assert!(store.get_by_user("user-1", &ListOptions::default()).is_empty());
        assert!(store.get_by_session("session-1").is_empty());
        assert!(store.remove_memory(&id).is_none());
    }

    #[test]
    fn search_scores_word_overlap() {
        let store = store_with(vec![
            Memory::new("user-1", "Rust is a systems language"),
            Memory::new("user-1", "Python is a scripting language"),
            Memory::new("user-2", "unrelated"),
        ]);

        let results = store.search(&SearchOptions {
            query: "rust language".to_string(),
            user_id: Some("user-1".to_string()),
            min_score: 0.6,
            top_k: 10,
            ..Default::default()
        });

        assert_eq!(results.len(), 1);
        assert!(results[0].memory.content.contains("Rust"));
        assert!((results[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn search_respects_min_score_and_top_k() {
        let store = store_with(vec![
            Memory::new("user-1", "alpha beta gamma"),
            Memory::new("user-1", "alpha beta"),
            Memory::new("user-1", "alpha"),
        ]);

        let results = store.search(&SearchOptions {
            query: "alpha beta gamma".to_string(),
            min_score: 0.5,
            top_k: 2,
            ..Default::default()
        });

        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        for result in &results {
            assert!(result.score >= 0.5);
        }
    }

    #[test]
    fn search_results_are_copies() {
        let store = store_with(vec![Memory::new("user-1", "original")]);
        let mut results = store.search(&SearchOptions::default());
        results[0].memory.content = "mutated".to_string();
        let unchanged = store.get_by_user("user-1", &ListOptions::default());
        assert_eq!(unchanged[0].content, "original");
    }

    #[test]
    fn get_by_user_sorts_and_pages() {
        let mut first = Memory::new("user-1", "low");
        first.importance = 0.1;
        let mut second = Memory::new("user-1", "mid");
        second.importance = 0.5;
        let mut third = Memory::new("user-1", "high");
        third.importance = 0.9;
        let store = store_with(vec![first, second, third]);

        let sorted = store.get_by_user(
            "user-1",
            &ListOptions {
                sort_by: SortField::Importance,
                descending: true,
                offset: 0,
                limit: 2,
            },
        );
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].content, "high");
        assert_eq!(sorted[1].content, "mid");

        let page = store.get_by_user(
            "user-1",
            &ListOptions {
                sort_by: SortField::Importance,
                descending: true,
                offset: 2,
                limit: 2,
            },
        );
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].content, "low");
    }

    #[test]
    fn offset_past_end_is_an_empty_page() {
        let store = store_with(vec![Memory::new("user-1", "only")]);
        let page = store.get_by_user(
            "user-1",
            &ListOptions {
                offset: 10,
                ..Default::default()
            },
        );
        assert!(page.is_empty());
    }

    #[test]
    fn entity_search_is_case_insensitive_substring() {
        let store = InMemoryStore::new();
        store
            .add_entity(Entity::new("Rust Language", EntityType::Concept))
            .unwrap();
        store
            .add_entity(Entity::new("Paris", EntityType::Place))
            .unwrap();

        let found = store.search_entities("rust", 0);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Rust Language");

        let all = store.search_entities("", 0);
        assert_eq!(all.len(), 2);

        let capped = store.search_entities("", 1);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn relationships_index_both_endpoints() {
        let store = InMemoryStore::new();
        let alice = store
            .add_entity(Entity::new("Alice", EntityType::Person))
            .unwrap();
        let paris = store
            .add_entity(Entity::new("Paris", EntityType::Place))
            .unwrap();
        let edge = store
            .add_relationship(Relationship::new(&alice.id, &paris.id, "lives_in"))
            .unwrap();

        assert_eq!(store.relationships_for_entity(&alice.id).len(), 1);
        assert_eq!(store.relationships_for_entity(&paris.id).len(), 1);

        store.delete_relationship(&edge.id).unwrap();
        assert!(store.relationships_for_entity(&alice.id).is_empty());
        assert!(store.relationships_for_entity(&paris.id).is_empty());
    }
}
