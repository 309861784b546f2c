//! Fluent lazy query builder.
//!
//! Predicates compose as a `FilterCondition` enum (`And`/`Or` over leaf
//! comparisons) rather than an ad-hoc chain of booleans: building a `Query`
//! does no work at all, evaluation only happens on
//! `.first()`/`.all()`/`.count()`.

use std::collections::BTreeSet;

use serde_json::Value as JsonValue;

use crate::entity::Entity;
use crate::error::{HsdbError, HsdbResult, SchemaError};
use crate::storage::Engine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A composable predicate over an entity's fields.
#[derive(Clone, Debug)]
pub enum FilterCondition {
    Equals { field: String, value: JsonValue },
    In { field: String, values: Vec<JsonValue> },
    Gt { field: String, value: f64 },
    Gte { field: String, value: f64 },
    Lt { field: String, value: f64 },
    Lte { field: String, value: f64 },
    Contains { field: String, substring: String },
    And(Vec<FilterCondition>),
    Or(Vec<FilterCondition>),
}

impl FilterCondition {
    fn matches(&self, entity: &Entity) -> bool {
        match self {
            FilterCondition::Equals { field, value } => entity.get(field) == Some(value),
            FilterCondition::In { field, values } => {
                entity.get(field).is_some_and(|found| values.iter().any(|candidate| candidate == found))
            }
            FilterCondition::Gt { field, value } => numeric(entity, field).is_some_and(|found| found > *value),
            FilterCondition::Gte { field, value } => numeric(entity, field).is_some_and(|found| found >= *value),
            FilterCondition::Lt { field, value } => numeric(entity, field).is_some_and(|found| found < *value),
            FilterCondition::Lte { field, value } => numeric(entity, field).is_some_and(|found| found <= *value),
            FilterCondition::Contains { field, substring } => entity
                .get(field)
                .and_then(JsonValue::as_str)
                .is_some_and(|found| found.contains(substring.as_str())),
            FilterCondition::And(conditions) => conditions.iter().all(|condition| condition.matches(entity)),
            FilterCondition::Or(conditions) => conditions.iter().any(|condition| condition.matches(entity)),
        }
    }

    /// Field names this condition (and its children) touch, used to check
    /// `contains` against the schema's `searchable` flag before scanning.
    fn contains_fields(&self) -> Vec<&str> {
        match self {
            FilterCondition::Contains { field, .. } => vec![field.as_str()],
            FilterCondition::And(conditions) | FilterCondition::Or(conditions) => {
                conditions.iter().flat_map(FilterCondition::contains_fields).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn numeric(entity: &Entity, field: &str) -> Option<f64> {
    entity.get(field).and_then(JsonValue::as_f64)
}

/// Lazy query over one model's entities. Nothing runs until `.first()`,
/// `.all()`, or `.count()` is called.
pub struct Query<'a> {
    engine: &'a Engine,
    model_name: String,
    conditions: Vec<FilterCondition>,
    order: Option<(String, SortOrder)>,
    limit: Option<usize>,
    offset: usize,
}

impl<'a> Query<'a> {
    pub(crate) fn new(engine: &'a Engine, model_name: impl Into<String>) -> Self {
        Self { engine, model_name: model_name.into(), conditions: Vec::new(), order: None, limit: None, offset: 0 }
    }

    pub fn where_field(self, field: impl Into<String>) -> FieldFilter<'a> {
        FieldFilter { query: self, field: field.into() }
    }

    /// Adds an arbitrary (already-built) condition, ANDed with the rest.
    pub fn and(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// ORs the given conditions together as a single clause, ANDed with the
    /// rest of the query's conditions.
    pub fn or(mut self, conditions: Vec<FilterCondition>) -> Self {
        self.conditions.push(FilterCondition::Or(conditions));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order = Some((field.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    fn check_searchable(&self) -> HsdbResult<()> {
        let Some(descriptor) = crate::schema::describe(&self.model_name) else {
            return Ok(());
        };
        for condition in &self.conditions {
            for field_name in condition.contains_fields() {
                if let Some(attr) = descriptor.field(field_name).and_then(|field| field.as_attribute()) {
                    if !attr.searchable {
                        return Err(HsdbError::Schema(SchemaError::single(
                            field_name,
                            "validation.not_searchable",
                            "field is not marked searchable; contains() is unavailable",
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Intersects id sets for every top-level `Equals` condition that lands
    /// on an `indexed` field, so `evaluate` can narrow to a candidate set via
    /// the field index instead of always scanning every entity of the model.
    /// Returns `None` when no top-level condition can use the index (the
    /// caller falls back to a full `get_all` scan).
    fn indexed_candidate_ids(&self) -> Option<BTreeSet<String>> {
        let mut candidates: Option<BTreeSet<String>> = None;
        for condition in &self.conditions {
            if let FilterCondition::Equals { field, value } = condition {
                let Some(ids) = self.engine.ids_for_field(&self.model_name, field, value) else { continue };
                candidates = Some(match candidates {
                    Some(existing) => existing.intersection(&ids).cloned().collect(),
                    None => ids,
                });
            }
        }
        candidates
    }

    fn evaluate(&self) -> HsdbResult<Vec<Entity>> {
        self.check_searchable()?;
        let mut entities = match self.indexed_candidate_ids() {
            Some(ids) => ids.into_iter().filter_map(|id| self.engine.get(&id).ok()).collect(),
            None => self.engine.get_all(&self.model_name)?,
        };
        entities.retain(|entity| self.conditions.iter().all(|condition| condition.matches(entity)));

        if let Some((field, order)) = &self.order {
            entities.sort_by(|a, b| {
                let ordering = compare_values(a.get(field), b.get(field));
                if *order == SortOrder::Desc { ordering.reverse() } else { ordering }
            });
        }

        let entities = entities.into_iter().skip(self.offset);
        Ok(match self.limit {
            Some(limit) => entities.take(limit).collect(),
            None => entities.collect(),
        })
    }

    pub fn first(self) -> HsdbResult<Option<Entity>> {
        Ok(self.evaluate()?.into_iter().next())
    }

    pub fn all(self) -> HsdbResult<Vec<Entity>> {
        self.evaluate()
    }

    pub fn count(self) -> HsdbResult<usize> {
        Ok(self.evaluate()?.len())
    }
}

fn compare_values(a: Option<&JsonValue>, b: Option<&JsonValue>) -> std::cmp::Ordering {
    match (a.and_then(JsonValue::as_f64), b.and_then(JsonValue::as_f64)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.and_then(JsonValue::as_str).cmp(&b.and_then(JsonValue::as_str)),
    }
}

/// Intermediate builder returned by `Query::where_field`, finalized into a
/// `Query` by one of its comparison methods.
pub struct FieldFilter<'a> {
    query: Query<'a>,
    field: String,
}

impl<'a> FieldFilter<'a> {
    pub fn equals(self, value: impl Into<JsonValue>) -> Query<'a> {
        self.push(FilterCondition::Equals { field: self.field.clone(), value: value.into() })
    }

    pub fn in_values(self, values: Vec<JsonValue>) -> Query<'a> {
        self.push(FilterCondition::In { field: self.field.clone(), values })
    }

    pub fn gt(self, value: f64) -> Query<'a> {
        self.push(FilterCondition::Gt { field: self.field.clone(), value })
    }

    pub fn gte(self, value: f64) -> Query<'a> {
        self.push(FilterCondition::Gte { field: self.field.clone(), value })
    }

    pub fn lt(self, value: f64) -> Query<'a> {
        self.push(FilterCondition::Lt { field: self.field.clone(), value })
    }

    pub fn lte(self, value: f64) -> Query<'a> {
        self.push(FilterCondition::Lte { field: self.field.clone(), value })
    }

    pub fn contains(self, substring: impl Into<String>) -> Query<'a> {
        self.push(FilterCondition::Contains { field: self.field.clone(), substring: substring.into() })
    }

    fn push(self, condition: FilterCondition) -> Query<'a> {
        let mut query = self.query;
        query.conditions.push(condition);
        query
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::config::HsdbConfig;
    use crate::schema::{self, Attribute, EntityDescriptor, FieldType};

    fn engine_with_indexed_and_plain_fields() -> Engine {
        schema::register(
            EntityDescriptor::new("query-test-widget")
                .with_attribute(Attribute::new("sku", FieldType::String).indexed())
                .with_attribute(Attribute::new("color", FieldType::String)),
        )
        .unwrap();
        Engine::new(HsdbConfig::in_memory()).unwrap()
    }

    fn widget(engine: &Engine, sku: &str, color: &str) -> Entity {
        let mut fields = BTreeMap::new();
        fields.insert("sku".to_string(), json!(sku));
        fields.insert("color".to_string(), json!(color));
        engine.create("query-test-widget", fields).unwrap()
    }

    #[test]
    fn equals_on_indexed_field_uses_the_field_index_plan() {
        let engine = engine_with_indexed_and_plain_fields();
        widget(&engine, "W-1", "red");
        widget(&engine, "W-2", "blue");

        let query = engine.query("query-test-widget").where_field("sku").equals("W-1");
        assert_eq!(query.engine.ids_for_field("query-test-widget", "sku", &json!("W-1")).map(|ids| ids.len()), Some(1));
        let results = engine.query("query-test-widget").where_field("sku").equals("W-1").all().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("sku"), Some(&json!("W-1")));
    }

    #[test]
    fn equals_on_non_indexed_field_still_filters_correctly_via_full_scan() {
        let engine = engine_with_indexed_and_plain_fields();
        widget(&engine, "W-1", "red");
        widget(&engine, "W-2", "blue");

        assert!(engine.ids_for_field("query-test-widget", "color", &json!("red")).is_none());
        let results = engine.query("query-test-widget").where_field("color").equals("red").all().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("color"), Some(&json!("red")));
    }

    #[test]
    fn two_indexed_equals_conditions_intersect_before_residual_filtering() {
        schema::register(
            EntityDescriptor::new("query-test-enrollment")
                .with_attribute(Attribute::new("term", FieldType::String).indexed())
                .with_attribute(Attribute::new("status", FieldType::String).indexed()),
        )
        .unwrap();
        let engine = Engine::new(HsdbConfig::in_memory()).unwrap();

        let make = |term: &str, status: &str| {
            let mut fields = BTreeMap::new();
            fields.insert("term".to_string(), json!(term));
            fields.insert("status".to_string(), json!(status));
            engine.create("query-test-enrollment", fields).unwrap()
        };
        make("fall", "active");
        make("fall", "withdrawn");
        make("spring", "active");

        let results =
            engine.query("query-test-enrollment").where_field("term").equals("fall").and(FilterCondition::Equals {
                field: "status".to_string(),
                value: json!("active"),
            }).all().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("term"), Some(&json!("fall")));
        assert_eq!(results[0].get("status"), Some(&json!("active")));
    }
}
