//! The storage engine: orchestrates the index family and the raw-file
//! mirror behind `create`/`update`/`delete`/`get`/`get_all`/`find_by`/
//! `count`/`query`.
//!
//! Grounded in
//! `original_source/python/teatype/hsdb/IndexDatabase.py`'s `create_entry`/
//! `get_entries`/`get_entry`/`query`, with the per-model dedupe `match`
//! generalized into the schema's `unique_constraints` (see `DESIGN.md`).

pub mod query;
pub mod rawfile;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tracing::{debug, instrument, warn};

use crate::config::HsdbConfig;
use crate::entity::Entity;
use crate::error::{ConflictError, HsdbError, HsdbResult};
use crate::id::generate_entity_id;
use crate::index::{FieldIndex, ModelIndex, PrimaryIndex, RelationalIndex};
use crate::schema::{self, CascadePolicy, Relation, RelationKind};
use crate::storage::query::Query;
use crate::storage::rawfile::RawFileHandler;

/// The storage engine. Cheaply cloneable handles aren't needed: callers
/// share one long-lived `Engine` behind an `Arc` per process.
pub struct Engine {
    primary: PrimaryIndex,
    model: ModelIndex,
    field: FieldIndex,
    relational: RelationalIndex,
    rawfile: RawFileHandler,
    /// Serializes multi-index mutations (create/update/delete). Reads never
    /// take this lock, since each sub-index is independently lockable.
    write_lock: Mutex<()>,
    quarantined: AtomicBool,
}

impl Engine {
    pub fn new(config: HsdbConfig) -> HsdbResult<Self> {
        config.validate()?;
        let rawfile = RawFileHandler::new(config.root_path.clone(), config.persistence);
        rawfile.ensure_fs_created()?;
        Ok(Self {
            primary: PrimaryIndex::new(config.primary_index_max_size),
            model: ModelIndex::new(),
            field: FieldIndex::new(),
            relational: RelationalIndex::new(),
            rawfile,
            write_lock: Mutex::new(()),
            quarantined: AtomicBool::new(false),
        })
    }

    fn check_not_quarantined(&self) -> HsdbResult<()> {
        if self.quarantined.load(Ordering::SeqCst) {
            return Err(HsdbError::EngineQuarantined { reason: "a prior rollback failed; engine is read-only".to_string() });
        }
        Ok(())
    }

    #[instrument(skip(self, fields))]
    pub fn create(&self, model_name: &str, fields: BTreeMap<String, JsonValue>) -> HsdbResult<Entity> {
        self.check_not_quarantined()?;
        schema::validate(model_name, &fields)?;

        let _guard = self.write_lock.lock().expect("engine write lock poisoned");
        self.check_unique_constraints(model_name, &fields, None)?;

        let id = generate_entity_id();
        let entity = Entity::new(id, model_name, fields);
        let serialized = schema::serialize(model_name, &entity.id, &entity.fields);

        let evicted = self.primary.insert(entity.clone());
        self.model.insert(model_name, &entity.id);
        self.index_fields(&entity);
        self.index_relations(&entity);
        if let Some(evicted) = evicted {
            self.flush_evicted(evicted);
        }

        if let Err(err) = self.rawfile.create_entry(&entity, &serialized) {
            self.rollback_create(&entity);
            return Err(err);
        }

        debug!(entity_id = %entity.id, model = model_name, "entity created");
        Ok(entity)
    }

    fn rollback_create(&self, entity: &Entity) {
        self.primary.remove(&entity.id);
        self.model.remove(&entity.model_name, &entity.id);
        self.deindex_fields(entity);
        self.deindex_relations(entity);
    }

    #[instrument(skip(self, patch))]
    pub fn update(&self, entity_id: &str, patch: BTreeMap<String, JsonValue>) -> HsdbResult<Entity> {
        self.check_not_quarantined()?;

        let _guard = self.write_lock.lock().expect("engine write lock poisoned");
        let existing = self.primary.get(entity_id).ok_or_else(|| HsdbError::not_found(entity_id))?;

        let mut merged = existing.fields.clone();
        for (field_name, value) in &patch {
            merged.insert(field_name.clone(), value.clone());
        }
        schema::validate(&existing.model_name, &merged)?;
        self.check_unique_constraints(&existing.model_name, &merged, Some(entity_id))?;

        let updated = Entity::new(existing.id.clone(), existing.model_name.clone(), merged);
        let serialized = schema::serialize(&updated.model_name, &updated.id, &updated.fields);

        self.deindex_fields(&existing);
        self.index_fields(&updated);
        if let Some(evicted) = self.primary.insert(updated.clone()) {
            self.flush_evicted(evicted);
        }

        if let Err(err) = self.rawfile.update_entry(&updated, &serialized) {
            // Roll back to the previous field values.
            self.deindex_fields(&updated);
            self.index_fields(&existing);
            if let Some(evicted) = self.primary.insert(existing) {
                self.flush_evicted(evicted);
            }
            return Err(err);
        }

        debug!(entity_id, model = %updated.model_name, "entity updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub fn delete(&self, entity_id: &str) -> HsdbResult<()> {
        self.check_not_quarantined()?;

        let _guard = self.write_lock.lock().expect("engine write lock poisoned");
        let entity = self.primary.get(entity_id).ok_or_else(|| HsdbError::not_found(entity_id))?;

        self.primary.remove(entity_id);
        self.model.remove(&entity.model_name, entity_id);
        self.deindex_fields(&entity);
        self.apply_cascades(&entity);

        if let Err(err) = self.rawfile.delete_entry(&entity) {
            if self.rollback_delete(&entity).is_err() {
                self.quarantined.store(true, Ordering::SeqCst);
                warn!(entity_id, "rollback after failed delete persistence also failed; engine quarantined");
                return Err(HsdbError::EngineQuarantined {
                    reason: format!("delete of {entity_id} could not be persisted or rolled back: {err}"),
                });
            }
            return Err(err);
        }

        debug!(entity_id, model = %entity.model_name, "entity deleted");
        Ok(())
    }

    /// Re-indexes an entity after a failed delete persistence. Infallible in
    /// this implementation (pure in-memory map inserts), but kept as a
    /// `Result` so the quarantine path in `delete` has somewhere real to go
    /// if a future index gains fallible insert semantics.
    fn rollback_delete(&self, entity: &Entity) -> HsdbResult<()> {
        if let Some(evicted) = self.primary.insert(entity.clone()) {
            self.flush_evicted(evicted);
        }
        self.model.insert(&entity.model_name, &entity.id);
        self.index_fields(entity);
        self.index_relations(entity);
        Ok(())
    }

    /// An id evicted from the bounded primary index is not gone: it's
    /// flushed to disk (so a later `get` can still be served by a
    /// persistence layer able to read it back) and scrubbed from every
    /// sub-index that still pointed at it, so `count`/`find_by`/relation
    /// traversal stay consistent with what's actually resident in memory.
    fn flush_evicted(&self, evicted: Entity) {
        let serialized = schema::serialize(&evicted.model_name, &evicted.id, &evicted.fields);
        if let Err(err) = self.rawfile.update_entry(&evicted, &serialized) {
            warn!(entity_id = %evicted.id, model = %evicted.model_name, %err, "failed to flush evicted entity to disk");
        }
        self.model.remove(&evicted.model_name, &evicted.id);
        self.deindex_fields(&evicted);
        self.deindex_relations(&evicted);
    }

    fn apply_cascades(&self, entity: &Entity) {
        let Some(descriptor) = schema::describe(&entity.model_name) else {
            return;
        };

        for relation in descriptor.relations() {
            let key = relation.relation_key(&entity.model_name);
            match relation.cascade {
                CascadePolicy::Delete => {
                    for target_id in self.related_ids(&key, relation.kind, &entity.id) {
                        let _ = self.delete(&target_id);
                    }
                }
                CascadePolicy::Detach | CascadePolicy::None => {
                    self.relational.remove_all_edges(&key, &entity.id);
                }
            }
        }

        for incoming in schema::find_incoming_relations(&entity.model_name) {
            let key = schema::relation_key(&incoming.source_model, incoming.kind, &entity.model_name);
            self.relational.remove_all_edges(&key, &entity.id);
        }
    }

    fn related_ids(&self, relation_key: &str, kind: RelationKind, id: &str) -> Vec<String> {
        match kind {
            RelationKind::OneToOne => self.relational.get_one_to_one(relation_key, id).into_iter().collect(),
            RelationKind::ManyToOne => self.relational.get_one_to_many(relation_key, id).into_iter().collect(),
            RelationKind::OneToMany => self.relational.get_one_to_many_members(relation_key, id).into_iter().collect(),
            RelationKind::ManyToMany => self.relational.get_many_to_many(relation_key, id).into_iter().collect(),
        }
    }

    pub fn get(&self, entity_id: &str) -> HsdbResult<Entity> {
        self.primary.get(entity_id).ok_or_else(|| HsdbError::not_found(entity_id))
    }

    pub fn get_all(&self, model_name: &str) -> HsdbResult<Vec<Entity>> {
        let ids = self.model.ids_for(model_name);
        Ok(ids.into_iter().filter_map(|id| self.primary.get(&id)).collect())
    }

    pub fn find_by(&self, model_name: &str, field_name: &str, value: &JsonValue) -> HsdbResult<Vec<Entity>> {
        let ids = self.field.ids_for(model_name, field_name, value);
        Ok(ids.into_iter().filter_map(|id| self.primary.get(&id)).collect())
    }

    pub fn count(&self, model_name: &str) -> usize {
        self.model.count(model_name)
    }

    pub fn query(&self, model_name: impl Into<String>) -> Query<'_> {
        Query::new(self, model_name)
    }

    /// Fetches an entity and serializes it, with relation-field handling:
    /// `include_relations = false` strips relation fields from the map
    /// entirely; `include_relations = true` keeps them, and `expand_relations`
    /// further decides whether each relation field carries the bare related
    /// id(s) (`false`) or the related entity/entities' own serialized map
    /// (`true`). Expansion is single-level: a related entity's own relations
    /// are never themselves expanded.
    pub fn get_serialized(&self, entity_id: &str, include_relations: bool, expand_relations: bool) -> HsdbResult<JsonValue> {
        let entity = self.get(entity_id)?;
        Ok(self.serialize_entity(&entity, include_relations, expand_relations))
    }

    pub fn serialize_entity(&self, entity: &Entity, include_relations: bool, expand_relations: bool) -> JsonValue {
        let mut fields = entity.fields.clone();
        if let Some(descriptor) = schema::describe(&entity.model_name) {
            for relation in descriptor.relations() {
                if !include_relations {
                    fields.remove(&relation.name);
                    continue;
                }
                if expand_relations {
                    fields.insert(relation.name.clone(), self.expand_relation(entity, relation));
                }
            }
        }
        schema::serialize(&entity.model_name, &entity.id, &fields)
    }

    fn expand_relation(&self, entity: &Entity, relation: &Relation) -> JsonValue {
        let key = relation.relation_key(&entity.model_name);
        let serialize_related = |id: &str| -> Option<JsonValue> {
            self.get(id).ok().map(|related| schema::serialize(&related.model_name, &related.id, &related.fields))
        };
        match relation.kind {
            RelationKind::OneToOne => {
                self.relational.get_one_to_one(&key, &entity.id).as_deref().and_then(serialize_related).unwrap_or(JsonValue::Null)
            }
            RelationKind::ManyToOne => entity.to_one(&relation.name).and_then(serialize_related).unwrap_or(JsonValue::Null),
            RelationKind::OneToMany => {
                JsonValue::Array(self.relational.get_one_to_many_members(&key, &entity.id).iter().filter_map(|id| serialize_related(id)).collect())
            }
            RelationKind::ManyToMany => {
                JsonValue::Array(self.relational.get_many_to_many(&key, &entity.id).iter().filter_map(|id| serialize_related(id)).collect())
            }
        }
    }

    /// Only writes fields the model's descriptor marks `indexed` into the
    /// field index; an unregistered model or an unknown field indexes
    /// nothing.
    fn indexed_field_names(&self, model_name: &str) -> Vec<String> {
        let Some(descriptor) = schema::describe(model_name) else {
            return Vec::new();
        };
        descriptor.attributes().filter(|attr| attr.indexed).map(|attr| attr.name.clone()).collect()
    }

    fn index_fields(&self, entity: &Entity) {
        for field_name in self.indexed_field_names(&entity.model_name) {
            if let Some(value) = entity.fields.get(&field_name) {
                self.field.insert(&entity.model_name, &field_name, value, &entity.id);
            }
        }
    }

    fn deindex_fields(&self, entity: &Entity) {
        for field_name in self.indexed_field_names(&entity.model_name) {
            if let Some(value) = entity.fields.get(&field_name) {
                self.field.remove(&entity.model_name, &field_name, value, &entity.id);
            }
        }
    }

    /// Looks up ids for an equality predicate on a field, but only when the
    /// field is actually declared `indexed` on the model (otherwise the
    /// field index holds nothing for it and an empty result would be
    /// indistinguishable from "no matches", which `Query` must not assume).
    pub(crate) fn ids_for_field(&self, model_name: &str, field_name: &str, value: &JsonValue) -> Option<BTreeSet<String>> {
        let descriptor = schema::describe(model_name)?;
        let attr = descriptor.attributes().find(|attr| attr.name == field_name)?;
        if !attr.indexed {
            return None;
        }
        Some(self.field.ids_for(model_name, field_name, value).into_iter().collect())
    }

    fn index_relations(&self, entity: &Entity) {
        let Some(descriptor) = schema::describe(&entity.model_name) else {
            return;
        };
        for relation in descriptor.relations() {
            let key = relation.relation_key(&entity.model_name);
            match relation.kind {
                RelationKind::OneToOne => {
                    if let Some(target) = entity.to_one(&relation.name) {
                        self.relational.set_one_to_one(&key, &entity.id, target);
                    }
                }
                RelationKind::ManyToOne => {
                    if let Some(target) = entity.to_one(&relation.name) {
                        self.relational.set_many_to_one(&key, &entity.id, target);
                    }
                }
                RelationKind::OneToMany => {
                    for member in entity.to_many(&relation.name) {
                        self.relational.set_one_to_many(&key, &entity.id, &member);
                    }
                }
                RelationKind::ManyToMany => {
                    for target in entity.to_many(&relation.name) {
                        self.relational.add_many_to_many(&key, &entity.id, &target);
                    }
                }
            }
        }
    }

    fn deindex_relations(&self, entity: &Entity) {
        let Some(descriptor) = schema::describe(&entity.model_name) else {
            return;
        };
        for relation in descriptor.relations() {
            let key = relation.relation_key(&entity.model_name);
            self.relational.remove_all_edges(&key, &entity.id);
            if relation.kind == RelationKind::OneToMany {
                for member in entity.to_many(&relation.name) {
                    self.relational.remove_one_to_many(&key, &member);
                }
            }
        }
    }

    fn check_unique_constraints(
        &self,
        model_name: &str,
        fields: &BTreeMap<String, JsonValue>,
        excluding_id: Option<&str>,
    ) -> HsdbResult<()> {
        let Some(descriptor) = schema::describe(model_name) else {
            return Ok(());
        };

        let mut constraints: Vec<Vec<String>> =
            descriptor.unique_constraints.iter().map(|constraint| constraint.fields().to_vec()).collect();
        for attribute in descriptor.attributes() {
            if attribute.unique {
                constraints.push(vec![attribute.name.clone()]);
            }
        }

        for constraint_fields in constraints {
            if constraint_fields.len() == 1 {
                let field_name = &constraint_fields[0];
                let Some(value) = fields.get(field_name) else { continue };
                let matches = self.field.ids_for(model_name, field_name, value);
                if let Some(existing_id) = matches.into_iter().find(|id| Some(id.as_str()) != excluding_id) {
                    return Err(HsdbError::Conflict(ConflictError::UniqueViolation {
                        model_name: model_name.to_string(),
                        fields: constraint_fields,
                        existing_entity_id: existing_id,
                    }));
                }
            } else {
                // Compound constraint: scan the model's current entities.
                // Acceptable for the scale this engine targets; query-plan
                // optimization beyond single-field lookups is out of scope.
                for candidate in self.get_all(model_name)? {
                    if excluding_id == Some(candidate.id.as_str()) {
                        continue;
                    }
                    let all_match = constraint_fields.iter().all(|field_name| candidate.fields.get(field_name) == fields.get(field_name));
                    if all_match {
                        return Err(HsdbError::Conflict(ConflictError::UniqueViolation {
                            model_name: model_name.to_string(),
                            fields: constraint_fields,
                            existing_entity_id: candidate.id,
                        }));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HsdbConfig;
    use crate::schema::{Attribute, EntityDescriptor, FieldType};
    use serde_json::json;

    fn engine() -> Engine {
        let descriptor = EntityDescriptor::new("engine-test-student")
            .with_attribute(Attribute::new("name", FieldType::String).required().unique())
            .with_attribute(Attribute::new("age", FieldType::Int).indexed());
        schema::register(descriptor).unwrap();
        Engine::new(HsdbConfig::in_memory()).unwrap()
    }

    fn fields(name: &str, age: i64) -> BTreeMap<String, JsonValue> {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), json!(name));
        fields.insert("age".to_string(), json!(age));
        fields
    }

    #[test]
    fn create_then_get_round_trips() {
        let engine = engine();
        let entity = engine.create("engine-test-student", fields("Ada", 30)).unwrap();
        let found = engine.get(&entity.id).unwrap();
        assert_eq!(found.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn duplicate_unique_field_is_rejected() {
        let engine = engine();
        engine.create("engine-test-student", fields("Ada", 30)).unwrap();
        let err = engine.create("engine-test-student", fields("Ada", 40)).unwrap_err();
        assert!(matches!(err, HsdbError::Conflict(ConflictError::UniqueViolation { .. })));
    }

    #[test]
    fn update_changes_fields_and_reindexes() {
        let engine = engine();
        let entity = engine.create("engine-test-student", fields("Ada", 30)).unwrap();
        let mut patch = BTreeMap::new();
        patch.insert("age".to_string(), json!(31));
        let updated = engine.update(&entity.id, patch).unwrap();
        assert_eq!(updated.get("age"), Some(&json!(31)));
        assert_eq!(engine.find_by("engine-test-student", "age", &json!(31)).unwrap().len(), 1);
        assert!(engine.find_by("engine-test-student", "age", &json!(30)).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_from_all_indices() {
        let engine = engine();
        let entity = engine.create("engine-test-student", fields("Ada", 30)).unwrap();
        engine.delete(&entity.id).unwrap();
        assert!(engine.get(&entity.id).is_err());
        assert_eq!(engine.count("engine-test-student"), 0);
    }

    #[test]
    fn get_missing_entity_returns_not_found() {
        let engine = engine();
        assert!(matches!(engine.get("missing"), Err(HsdbError::NotFound { .. })));
    }

    /// Eviction from the bounded primary index must flush the evicted entity
    /// to disk and scrub it from every other index, not just drop it.
    #[test]
    fn eviction_flushes_to_disk_and_deindexes() {
        schema::register(
            EntityDescriptor::new("engine-test-evictable").with_attribute(Attribute::new("tag", FieldType::String).indexed()),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(HsdbConfig::persistent(dir.path()).with_primary_index_max_size(2)).unwrap();

        let mut first_fields = BTreeMap::new();
        first_fields.insert("tag".to_string(), json!("first"));
        let first = engine.create("engine-test-evictable", first_fields).unwrap();

        for i in 0..2 {
            let mut fields = BTreeMap::new();
            fields.insert("tag".to_string(), json!(format!("filler-{i}")));
            engine.create("engine-test-evictable", fields).unwrap();
        }

        // `first` was evicted from the bounded in-memory index, but its
        // model/field-index bookkeeping must already be gone and its JSON
        // must be on disk.
        assert_eq!(engine.count("engine-test-evictable"), 2);
        assert!(engine.find_by("engine-test-evictable", "tag", &json!("first")).unwrap().is_empty());
        assert!(dir.path().join("hsdb/index").join(first.path()).exists());
    }

    #[test]
    fn one_to_many_relation_is_visible_from_owner_and_member() {
        schema::register(
            EntityDescriptor::new("engine-test-campus")
                .with_relation(Relation::new("students", "engine-test-enrollee", RelationKind::OneToMany).with_cascade(CascadePolicy::Detach)),
        )
        .unwrap();
        schema::register(EntityDescriptor::new("engine-test-enrollee").with_attribute(Attribute::new("name", FieldType::String))).unwrap();
        let engine = Engine::new(HsdbConfig::in_memory()).unwrap();

        let mut enrollee_fields = BTreeMap::new();
        enrollee_fields.insert("name".to_string(), json!("Ada"));
        let enrollee = engine.create("engine-test-enrollee", enrollee_fields).unwrap();

        let mut campus_fields = BTreeMap::new();
        campus_fields.insert("students".to_string(), json!([enrollee.id]));
        let campus = engine.create("engine-test-campus", campus_fields).unwrap();

        let expanded = engine.get_serialized(&campus.id, true, true).unwrap();
        let students = expanded["fields"]["students"].as_array().expect("students expands to an array");
        assert_eq!(students.len(), 1);
        assert_eq!(students[0]["fields"]["name"], json!("Ada"));
    }

    #[test]
    fn serialize_entity_can_strip_or_expand_relations() {
        schema::register(
            EntityDescriptor::new("engine-test-enrollment")
                .with_relation(Relation::new("advisor", "engine-test-advisor", RelationKind::ManyToOne)),
        )
        .unwrap();
        schema::register(EntityDescriptor::new("engine-test-advisor").with_attribute(Attribute::new("name", FieldType::String))).unwrap();
        let engine = Engine::new(HsdbConfig::in_memory()).unwrap();

        let mut advisor_fields = BTreeMap::new();
        advisor_fields.insert("name".to_string(), json!("Dr. Lin"));
        let advisor = engine.create("engine-test-advisor", advisor_fields).unwrap();

        let mut enrollment_fields = BTreeMap::new();
        enrollment_fields.insert("advisor".to_string(), json!(advisor.id));
        let enrollment = engine.create("engine-test-enrollment", enrollment_fields).unwrap();

        let stripped = engine.get_serialized(&enrollment.id, false, false).unwrap();
        assert!(stripped["fields"].get("advisor").is_none());

        let raw = engine.get_serialized(&enrollment.id, true, false).unwrap();
        assert_eq!(raw["fields"]["advisor"], json!(advisor.id));

        let expanded = engine.get_serialized(&enrollment.id, true, true).unwrap();
        assert_eq!(expanded["fields"]["advisor"]["fields"]["name"], json!("Dr. Lin"));
    }
}
