//! Primary id -> entity index.
//!
//! Grounded in `original_source/python/teatype/hsdb/indices/BaseIndex.py`'s
//! `primary_index` dict plus its transaction lock, with an optional bounded
//! LRU eviction mode modeled after `draco28-PulseDB`'s size-bounded cache
//! config.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::entity::Entity;

/// `id -> Entity`, independently lockable from the other sub-indices so a
/// read of one index never blocks a write to another.
pub struct PrimaryIndex {
    entries: RwLock<HashMap<String, Entity>>,
    /// Insertion order, used only when `max_size` is set, to evict the
    /// least-recently-inserted entry. `None` means unbounded.
    max_size: Option<usize>,
    order: RwLock<Vec<String>>,
}

impl PrimaryIndex {
    pub fn new(max_size: Option<usize>) -> Self {
        Self { entries: RwLock::new(HashMap::new()), max_size, order: RwLock::new(Vec::new()) }
    }

    /// Inserts or replaces an entity, returning the evicted entity when the
    /// bound was exceeded. The caller is responsible for flushing the
    /// evicted entity to disk and deindexing it before it's dropped.
    pub fn insert(&self, entity: Entity) -> Option<Entity> {
        let id = entity.id.clone();
        let mut entries = self.entries.write().expect("primary index poisoned");
        let is_new = !entries.contains_key(&id);
        entries.insert(id.clone(), entity);
        drop(entries);

        if is_new {
            let mut order = self.order.write().expect("primary index poisoned");
            order.push(id);
        }

        self.evict_if_needed()
    }

    fn evict_if_needed(&self) -> Option<Entity> {
        let max_size = self.max_size?;
        let mut order = self.order.write().expect("primary index poisoned");
        if order.len() <= max_size {
            return None;
        }
        let evicted_id = order.remove(0);
        drop(order);
        self.entries.write().expect("primary index poisoned").remove(&evicted_id)
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.entries.read().expect("primary index poisoned").get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().expect("primary index poisoned").contains_key(id)
    }

    pub fn remove(&self, id: &str) -> Option<Entity> {
        let removed = self.entries.write().expect("primary index poisoned").remove(id);
        if removed.is_some() {
            self.order.write().expect("primary index poisoned").retain(|existing| existing != id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("primary index poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Entity> {
        self.entries.read().expect("primary index poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn entity(id: &str) -> Entity {
        Entity::new(id, "student", BTreeMap::new())
    }

    #[test]
    fn insert_then_get_round_trips() {
        let index = PrimaryIndex::new(None);
        index.insert(entity("a"));
        assert!(index.contains("a"));
        assert_eq!(index.get("a").unwrap().id, "a");
    }

    #[test]
    fn remove_drops_entry() {
        let index = PrimaryIndex::new(None);
        index.insert(entity("a"));
        assert!(index.remove("a").is_some());
        assert!(!index.contains("a"));
    }

    #[test]
    fn bounded_index_evicts_oldest() {
        let index = PrimaryIndex::new(Some(2));
        index.insert(entity("a"));
        index.insert(entity("b"));
        let evicted = index.insert(entity("c"));
        assert_eq!(evicted.map(|e| e.id), Some("a".to_string()));
        assert_eq!(index.len(), 2);
        assert!(!index.contains("a"));
    }
}
