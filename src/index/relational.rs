//! Forward/inverse relation-edge index.
//!
//! Storage shape is ported directly from
//! `original_source/python/teatype/hsdb/indices/RelationalIndex.py`:
//!
//! - one-to-one: a scalar edge on both sides (`forward_scalar[key][a] = b`,
//!   `reverse_scalar[key][b] = a`).
//! - many-to-one: a scalar edge on the "many" side, a list on the "one" side
//!   (`forward_scalar[key][many_id] = one_id`,
//!   `reverse_list[key][one_id] ∋ many_id`).
//! - many-to-many: a list on both sides, symmetric, with no separate reverse
//!   map at all (`list[key][a] ∋ b` and `list[key][b] ∋ a`).

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

type Key = (String, String);

#[derive(Default)]
pub struct RelationalIndex {
    forward_scalar: RwLock<HashMap<Key, String>>,
    reverse_scalar: RwLock<HashMap<Key, String>>,
    reverse_list: RwLock<HashMap<Key, BTreeSet<String>>>,
    symmetric_list: RwLock<HashMap<Key, BTreeSet<String>>>,
}

impl RelationalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_one_to_one(&self, relation_key: &str, a_id: &str, b_id: &str) {
        self.forward_scalar.write().expect("relational index poisoned").insert((relation_key.to_string(), a_id.to_string()), b_id.to_string());
        self.reverse_scalar.write().expect("relational index poisoned").insert((relation_key.to_string(), b_id.to_string()), a_id.to_string());
    }

    pub fn get_one_to_one(&self, relation_key: &str, a_id: &str) -> Option<String> {
        self.forward_scalar.read().expect("relational index poisoned").get(&(relation_key.to_string(), a_id.to_string())).cloned()
    }

    pub fn get_one_to_one_reverse(&self, relation_key: &str, b_id: &str) -> Option<String> {
        self.reverse_scalar.read().expect("relational index poisoned").get(&(relation_key.to_string(), b_id.to_string())).cloned()
    }

    pub fn remove_one_to_one(&self, relation_key: &str, a_id: &str) {
        let key = (relation_key.to_string(), a_id.to_string());
        if let Some(b_id) = self.forward_scalar.write().expect("relational index poisoned").remove(&key) {
            self.reverse_scalar.write().expect("relational index poisoned").remove(&(relation_key.to_string(), b_id));
        }
    }

    pub fn set_many_to_one(&self, relation_key: &str, many_id: &str, one_id: &str) {
        let forward_key = (relation_key.to_string(), many_id.to_string());
        let mut forward = self.forward_scalar.write().expect("relational index poisoned");
        if let Some(previous_one) = forward.insert(forward_key, one_id.to_string()) {
            if previous_one != one_id {
                if let Some(ids) = self.reverse_list.write().expect("relational index poisoned").get_mut(&(relation_key.to_string(), previous_one)) {
                    ids.remove(many_id);
                }
            }
        }
        drop(forward);
        self.reverse_list
            .write()
            .expect("relational index poisoned")
            .entry((relation_key.to_string(), one_id.to_string()))
            .or_default()
            .insert(many_id.to_string());
    }

    pub fn get_many_to_one(&self, relation_key: &str, many_id: &str) -> Option<String> {
        self.forward_scalar.read().expect("relational index poisoned").get(&(relation_key.to_string(), many_id.to_string())).cloned()
    }

    pub fn get_one_to_many(&self, relation_key: &str, one_id: &str) -> BTreeSet<String> {
        self.reverse_list.read().expect("relational index poisoned").get(&(relation_key.to_string(), one_id.to_string())).cloned().unwrap_or_default()
    }

    pub fn remove_many_to_one(&self, relation_key: &str, many_id: &str) {
        let forward_key = (relation_key.to_string(), many_id.to_string());
        if let Some(one_id) = self.forward_scalar.write().expect("relational index poisoned").remove(&forward_key) {
            if let Some(ids) = self.reverse_list.write().expect("relational index poisoned").get_mut(&(relation_key.to_string(), one_id)) {
                ids.remove(many_id);
            }
        }
    }

    /// `OneToMany` is structurally `ManyToOne` with the owning side swapped:
    /// the "one" side (`owner_id`) holds the list, the "many" side
    /// (`member_id`) holds the scalar back-reference. Reuses the same
    /// forward/reverse maps under the relation's own key so `remove_all_edges`
    /// needs no separate handling.
    pub fn set_one_to_many(&self, relation_key: &str, owner_id: &str, member_id: &str) {
        self.set_many_to_one(relation_key, member_id, owner_id);
    }

    pub fn get_one_to_many_owner(&self, relation_key: &str, member_id: &str) -> Option<String> {
        self.get_many_to_one(relation_key, member_id)
    }

    pub fn get_one_to_many_members(&self, relation_key: &str, owner_id: &str) -> BTreeSet<String> {
        self.get_one_to_many(relation_key, owner_id)
    }

    pub fn remove_one_to_many(&self, relation_key: &str, member_id: &str) {
        self.remove_many_to_one(relation_key, member_id);
    }

    pub fn add_many_to_many(&self, relation_key: &str, a_id: &str, b_id: &str) {
        let mut guard = self.symmetric_list.write().expect("relational index poisoned");
        guard.entry((relation_key.to_string(), a_id.to_string())).or_default().insert(b_id.to_string());
        guard.entry((relation_key.to_string(), b_id.to_string())).or_default().insert(a_id.to_string());
    }

    pub fn remove_many_to_many(&self, relation_key: &str, a_id: &str, b_id: &str) {
        let mut guard = self.symmetric_list.write().expect("relational index poisoned");
        if let Some(ids) = guard.get_mut(&(relation_key.to_string(), a_id.to_string())) {
            ids.remove(b_id);
        }
        if let Some(ids) = guard.get_mut(&(relation_key.to_string(), b_id.to_string())) {
            ids.remove(a_id);
        }
    }

    pub fn get_many_to_many(&self, relation_key: &str, id: &str) -> BTreeSet<String> {
        self.symmetric_list.read().expect("relational index poisoned").get(&(relation_key.to_string(), id.to_string())).cloned().unwrap_or_default()
    }

    /// Drops every edge touching `id` under `relation_key`, regardless of
    /// cardinality. Used by the storage engine on delete when the relation's
    /// `CascadePolicy` is `Detach` or `Delete`.
    pub fn remove_all_edges(&self, relation_key: &str, id: &str) {
        self.remove_one_to_one(relation_key, id);
        self.remove_many_to_one(relation_key, id);
        for other in self.get_many_to_many(relation_key, id) {
            self.remove_many_to_many(relation_key, id, &other);
        }
        // id may also be the "one" side of a many-to-one or "b" side of a
        // one-to-one; clear it from those maps too.
        let mut reverse_scalar = self.reverse_scalar.write().expect("relational index poisoned");
        reverse_scalar.remove(&(relation_key.to_string(), id.to_string()));
        drop(reverse_scalar);
        self.reverse_list.write().expect("relational index poisoned").remove(&(relation_key.to_string(), id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_to_one_is_bidirectional() {
        let index = RelationalIndex::new();
        index.set_one_to_one("student_one_to_one_profile", "s1", "p1");
        assert_eq!(index.get_one_to_one("student_one_to_one_profile", "s1"), Some("p1".to_string()));
        assert_eq!(index.get_one_to_one_reverse("student_one_to_one_profile", "p1"), Some("s1".to_string()));
    }

    #[test]
    fn many_to_one_reverse_is_a_list() {
        let index = RelationalIndex::new();
        index.set_many_to_one("student_many_to_one_university", "s1", "u1");
        index.set_many_to_one("student_many_to_one_university", "s2", "u1");
        assert_eq!(index.get_one_to_many("student_many_to_one_university", "u1").len(), 2);
        assert_eq!(index.get_many_to_one("student_many_to_one_university", "s1"), Some("u1".to_string()));
    }

    #[test]
    fn reassigning_many_to_one_moves_off_old_one_side() {
        let index = RelationalIndex::new();
        index.set_many_to_one("student_many_to_one_university", "s1", "u1");
        index.set_many_to_one("student_many_to_one_university", "s1", "u2");
        assert!(index.get_one_to_many("student_many_to_one_university", "u1").is_empty());
        assert_eq!(index.get_one_to_many("student_many_to_one_university", "u2").len(), 1);
    }

    #[test]
    fn many_to_many_is_symmetric_with_no_reverse_map() {
        let index = RelationalIndex::new();
        index.add_many_to_many("student_many_to_many_course", "s1", "c1");
        assert!(index.get_many_to_many("student_many_to_many_course", "s1").contains("c1"));
        assert!(index.get_many_to_many("student_many_to_many_course", "c1").contains("s1"));
    }

    #[test]
    fn one_to_many_members_are_visible_from_the_owner_side() {
        let index = RelationalIndex::new();
        index.set_one_to_many("university_one_to_many_student", "u1", "s1");
        index.set_one_to_many("university_one_to_many_student", "u1", "s2");
        assert_eq!(index.get_one_to_many_members("university_one_to_many_student", "u1").len(), 2);
        assert_eq!(index.get_one_to_many_owner("university_one_to_many_student", "s1"), Some("u1".to_string()));
    }

    #[test]
    fn remove_one_to_many_detaches_a_single_member() {
        let index = RelationalIndex::new();
        index.set_one_to_many("university_one_to_many_student", "u1", "s1");
        index.remove_one_to_many("university_one_to_many_student", "s1");
        assert!(index.get_one_to_many_members("university_one_to_many_student", "u1").is_empty());
        assert_eq!(index.get_one_to_many_owner("university_one_to_many_student", "s1"), None);
    }

    #[test]
    fn remove_all_edges_clears_every_cardinality() {
        let index = RelationalIndex::new();
        index.set_one_to_one("x", "a", "b");
        index.remove_all_edges("x", "a");
        assert_eq!(index.get_one_to_one("x", "a"), None);
        assert_eq!(index.get_one_to_one_reverse("x", "b"), None);
    }
}
