//! `(model_name, field_name) -> value -> id-set` index.
//!
//! Values are keyed by their canonical JSON encoding since `serde_json::Value`
//! has no `Ord`/`Hash` impl of its own. Absent or `null` fields are never
//! inserted, so `find_by` on a field no entity set returns an empty set
//! rather than enumerating rows that lack the field. See `DESIGN.md` for
//! the reasoning.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;

fn value_key(value: &JsonValue) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

pub struct FieldIndex {
    // (model_name, field_name) -> value_key -> ids
    entries: RwLock<HashMap<(String, String), HashMap<String, BTreeSet<String>>>>,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Indexes `value` under `(model_name, field_name)` for `id`. A `null`
    /// value is treated as absent and not indexed.
    pub fn insert(&self, model_name: &str, field_name: &str, value: &JsonValue, id: &str) {
        if value.is_null() {
            return;
        }
        let key = (model_name.to_string(), field_name.to_string());
        self.entries
            .write()
            .expect("field index poisoned")
            .entry(key)
            .or_default()
            .entry(value_key(value))
            .or_default()
            .insert(id.to_string());
    }

    pub fn remove(&self, model_name: &str, field_name: &str, value: &JsonValue, id: &str) {
        if value.is_null() {
            return;
        }
        let key = (model_name.to_string(), field_name.to_string());
        let mut guard = self.entries.write().expect("field index poisoned");
        if let Some(by_value) = guard.get_mut(&key) {
            if let Some(ids) = by_value.get_mut(&value_key(value)) {
                ids.remove(id);
                if ids.is_empty() {
                    by_value.remove(&value_key(value));
                }
            }
        }
    }

    /// Exact-match lookup. Returns an empty set for any field that was never
    /// indexed for this model, including fields never assigned a non-null
    /// value by any entity.
    pub fn ids_for(&self, model_name: &str, field_name: &str, value: &JsonValue) -> BTreeSet<String> {
        if value.is_null() {
            return BTreeSet::new();
        }
        let key = (model_name.to_string(), field_name.to_string());
        self.entries
            .read()
            .expect("field index poisoned")
            .get(&key)
            .and_then(|by_value| by_value.get(&value_key(value)))
            .cloned()
            .unwrap_or_default()
    }

    /// All distinct (value, id-set) pairs stored for a field, used by the
    /// query builder's range/contains predicates which cannot use a direct
    /// key lookup.
    pub fn all_values(&self, model_name: &str, field_name: &str) -> Vec<(JsonValue, BTreeSet<String>)> {
        let key = (model_name.to_string(), field_name.to_string());
        let guard = self.entries.read().expect("field index poisoned");
        let Some(by_value) = guard.get(&key) else {
            return Vec::new();
        };
        by_value
            .iter()
            .filter_map(|(value_key, ids)| serde_json::from_str(value_key).ok().map(|value| (value, ids.clone())))
            .collect()
    }
}

impl Default for FieldIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_then_exact_lookup() {
        let index = FieldIndex::new();
        index.insert("student", "year", &json!(2024), "a");
        assert_eq!(index.ids_for("student", "year", &json!(2024)).len(), 1);
    }

    #[test]
    fn null_value_is_never_indexed() {
        let index = FieldIndex::new();
        index.insert("student", "middle_name", &JsonValue::Null, "a");
        assert!(index.ids_for("student", "middle_name", &json!("x")).is_empty());
    }

    #[test]
    fn absent_field_lookup_returns_empty_set() {
        let index = FieldIndex::new();
        index.insert("student", "year", &json!(2024), "a");
        assert!(index.ids_for("student", "nonexistent_field", &json!(2024)).is_empty());
    }

    #[test]
    fn remove_drops_id_from_value_bucket() {
        let index = FieldIndex::new();
        index.insert("student", "year", &json!(2024), "a");
        index.remove("student", "year", &json!(2024), "a");
        assert!(index.ids_for("student", "year", &json!(2024)).is_empty());
    }
}
