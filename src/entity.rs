//! The in-memory entity representation.
//!
//! Field values are kept as `serde_json::Value` rather than a hand-rolled
//! scalar enum: every index, the raw-file mirror, and the bus/transport wire
//! format are already JSON, so a second value type would only add a
//! conversion layer with no payoff.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::schema::derive_collection_name;

/// A single stored entity: an opaque id, the model it belongs to, and its
/// field values (attributes and relation edges alike, keyed by field name).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub model_name: String,
    pub fields: BTreeMap<String, JsonValue>,
}

impl Entity {
    pub fn new(id: impl Into<String>, model_name: impl Into<String>, fields: BTreeMap<String, JsonValue>) -> Self {
        Self { id: id.into(), model_name: model_name.into(), fields }
    }

    /// The raw-file mirror path for this entity, relative to `hsdb/index/`:
    /// `<plural-kebab-model>/<id>.json`
    /// (`original_source/python/teatype/hsdb/RawFileHandler.py`).
    pub fn path(&self) -> String {
        format!("{}/{}.json", derive_collection_name(&self.model_name), self.id)
    }

    pub fn get(&self, field_name: &str) -> Option<&JsonValue> {
        self.fields.get(field_name)
    }

    /// Reads a to-one relation edge (a bare id string, or `null`).
    pub fn to_one(&self, field_name: &str) -> Option<&str> {
        self.fields.get(field_name).and_then(JsonValue::as_str)
    }

    /// Reads a to-many relation edge (an array of id strings).
    pub fn to_many(&self, field_name: &str) -> Vec<String> {
        self.fields
            .get(field_name)
            .and_then(JsonValue::as_array)
            .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    }

    pub fn set(&mut self, field_name: impl Into<String>, value: JsonValue) {
        self.fields.insert(field_name.into(), value);
    }
}
