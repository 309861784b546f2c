//! Model-name -> id-set index.
//!
//! Grounded in `BaseIndex.py`'s model-scoped bookkeeping: every `create`
//! adds the new id to its model's set, every `delete` removes it, and
//! `get_all(model_name)`/`count(model_name)` are answered from this index
//! without scanning the primary index.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

pub struct ModelIndex {
    by_model: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl ModelIndex {
    pub fn new() -> Self {
        Self { by_model: RwLock::new(HashMap::new()) }
    }

    pub fn insert(&self, model_name: &str, id: &str) {
        self.by_model.write().expect("model index poisoned").entry(model_name.to_string()).or_default().insert(id.to_string());
    }

    pub fn remove(&self, model_name: &str, id: &str) {
        if let Some(ids) = self.by_model.write().expect("model index poisoned").get_mut(model_name) {
            ids.remove(id);
        }
    }

    pub fn ids_for(&self, model_name: &str) -> BTreeSet<String> {
        self.by_model.read().expect("model index poisoned").get(model_name).cloned().unwrap_or_default()
    }

    pub fn count(&self, model_name: &str) -> usize {
        self.by_model.read().expect("model index poisoned").get(model_name).map(BTreeSet::len).unwrap_or(0)
    }
}

impl Default for ModelIndex {
    fn default() -> Self {
        Self::new()
    }
}
