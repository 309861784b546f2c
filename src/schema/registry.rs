//! Process-wide schema registry.
//!
//! A `OnceLock<RwLock<HashMap>>` populated once at registration time, keyed
//! by plain `model_name` rather than a multi-tenant `(service, collection)`
//! pair.

use std::collections::{BTreeMap, HashMap};
use std::sync::{OnceLock, RwLock};

use serde_json::Value as JsonValue;

use crate::error::{HsdbError, HsdbResult, SchemaError, ValidationIssue};
use crate::schema::descriptor::EntityDescriptor;
use crate::schema::relation::RelationKind;

fn registry() -> &'static RwLock<HashMap<String, EntityDescriptor>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, EntityDescriptor>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a model's descriptor. Idempotent: re-registering the same
/// `model_name` with an identical field table and constraint set is a
/// no-op, but re-registering it with a different shape fails with
/// `HsdbError::SchemaConflict` rather than silently overwriting it.
pub fn register(descriptor: EntityDescriptor) -> HsdbResult<()> {
    let mut guard = registry().write().expect("schema registry poisoned");
    if let Some(existing) = guard.get(&descriptor.model_name) {
        if !existing.same_shape(&descriptor) {
            return Err(HsdbError::SchemaConflict { model_name: descriptor.model_name });
        }
        return Ok(());
    }
    guard.insert(descriptor.model_name.clone(), descriptor);
    Ok(())
}

/// Returns a clone of a registered model's descriptor, or `None` if it was
/// never registered.
pub fn describe(model_name: &str) -> Option<EntityDescriptor> {
    registry().read().expect("schema registry poisoned").get(model_name).cloned()
}

/// Validates a field-value map against a model's registered descriptor.
/// Returns `SchemaError::Schema { issues: [{field: "model_name", ...}] }`
/// shaped error when the model itself isn't registered.
pub fn validate(model_name: &str, values: &BTreeMap<String, JsonValue>) -> Result<(), SchemaError> {
    let descriptor = describe(model_name).ok_or_else(|| {
        SchemaError::single(
            "model_name",
            "validation.unknown_model",
            format!("model '{model_name}' is not registered"),
        )
    })?;
    descriptor.validate_fields(values)
}

/// Serializes a field-value map to the JSON representation persisted by the
/// raw-file mirror: `{ "model_name": ..., "fields": { ... } }`.
pub fn serialize(model_name: &str, entity_id: &str, values: &BTreeMap<String, JsonValue>) -> JsonValue {
    serde_json::json!({
        "id": entity_id,
        "model_name": model_name,
        "fields": values,
    })
}

/// A relation on some other registered model that points at `model_name`,
/// used to drive cascade/detach on delete (teacher's `find_incoming_relations`).
#[derive(Clone, Debug)]
pub struct IncomingRelation {
    pub source_model: String,
    pub field_name: String,
    pub kind: RelationKind,
}

/// Scans the whole registry for relations whose `target_model` is
/// `model_name`.
pub fn find_incoming_relations(model_name: &str) -> Vec<IncomingRelation> {
    let guard = registry().read().expect("schema registry poisoned");
    let mut found = Vec::new();
    for descriptor in guard.values() {
        for relation in descriptor.relations() {
            if relation.target_model == model_name {
                found.push(IncomingRelation {
                    source_model: descriptor.model_name.clone(),
                    field_name: relation.name.clone(),
                    kind: relation.kind,
                });
            }
        }
    }
    found
}

/// Derives the raw-file collection segment for a model name: strips a
/// trailing `Model`/`-model` suffix, converts to kebab-case, and pluralizes
/// with a small ASCII-only heuristic (no pluralization crate dependency for
/// this narrow a need).
pub fn derive_collection_name(model_name: &str) -> String {
    let stripped = strip_model_suffix(model_name);
    let kebab = to_kebab_case(&stripped);
    pluralize(&kebab)
}

fn strip_model_suffix(name: &str) -> String {
    name.strip_suffix("Model").or_else(|| name.strip_suffix("-model")).unwrap_or(name).to_string()
}

fn to_kebab_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i != 0 {
                out.push('-');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return word.to_string();
    }
    if word.ends_with(['s', 'x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
        format!("{word}es")
    } else if let Some(stem) = word.strip_suffix('y') {
        let prev = stem.chars().last();
        match prev {
            Some(c) if !"aeiou".contains(c) => format!("{stem}ies"),
            _ => format!("{word}s"),
        }
    } else {
        format!("{word}s")
    }
}
