//! Entity-level schema descriptor: the full field table for one model plus
//! its uniqueness constraints.
//!
//! `UniqueConstraint` generalizes the per-model dedupe `match` the original
//! hardcodes in `IndexDatabase.create_entry` into a declared constraint the
//! engine enforces uniformly. See `DESIGN.md` for the resolution record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{SchemaError, ValidationIssue};
use crate::schema::attribute::{Attribute, FieldType, ValidationRule};
use crate::schema::relation::Relation;

/// One field slot in an entity descriptor: either a plain attribute or a
/// relation to another model.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Attribute(Attribute),
    Relation(Relation),
}

impl FieldKind {
    pub fn name(&self) -> &str {
        match self {
            FieldKind::Attribute(attr) => &attr.name,
            FieldKind::Relation(rel) => &rel.name,
        }
    }

    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            FieldKind::Attribute(attr) => Some(attr),
            FieldKind::Relation(_) => None,
        }
    }

    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            FieldKind::Relation(rel) => Some(rel),
            FieldKind::Attribute(_) => None,
        }
    }
}

/// A uniqueness constraint over one or more attribute names, compared
/// case-insensitively (teacher's `UniqueConstraintDescriptor`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniqueConstraint {
    Single(String),
    Compound(Vec<String>),
}

impl UniqueConstraint {
    pub fn fields(&self) -> &[String] {
        match self {
            UniqueConstraint::Single(field) => std::slice::from_ref(field),
            UniqueConstraint::Compound(fields) => fields,
        }
    }
}

/// The frozen field table and constraint set for one registered model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub model_name: String,
    pub fields: Vec<FieldKind>,
    pub unique_constraints: Vec<UniqueConstraint>,
}

impl EntityDescriptor {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self { model_name: model_name.into(), fields: Vec::new(), unique_constraints: Vec::new() }
    }

    pub fn with_field(mut self, field: FieldKind) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_attribute(self, attribute: Attribute) -> Self {
        self.with_field(FieldKind::Attribute(attribute))
    }

    pub fn with_relation(self, relation: Relation) -> Self {
        self.with_field(FieldKind::Relation(relation))
    }

    pub fn with_unique_constraint(mut self, constraint: UniqueConstraint) -> Self {
        self.unique_constraints.push(constraint);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldKind> {
        self.fields.iter().find(|field| field.name() == name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.fields.iter().filter_map(FieldKind::as_attribute)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.fields.iter().filter_map(FieldKind::as_relation)
    }

    /// Validates a field-value map against the descriptor's type, required,
    /// and per-rule constraints. Does not enforce uniqueness (that requires
    /// the index family and lives in `storage::Engine`). Strict: any key in
    /// `values` that isn't a declared field on this model is rejected too.
    pub fn validate_fields(&self, values: &BTreeMap<String, JsonValue>) -> Result<(), SchemaError> {
        let mut issues = Vec::new();

        for attr in self.attributes() {
            let provided = values.get(&attr.name);
            match provided {
                None => {
                    if attr.required {
                        issues.push(ValidationIssue::new(&attr.name, "validation.required", "field is required"));
                    }
                }
                Some(value) => {
                    if let Err(issue) = validate_type(attr, value) {
                        issues.push(issue);
                        continue;
                    }
                    issues.extend(validate_rules(attr, value));
                }
            }
        }

        let known: std::collections::HashSet<&str> = self.fields.iter().map(FieldKind::name).collect();
        for key in values.keys() {
            if !known.contains(key.as_str()) {
                issues.push(ValidationIssue::new(key, "validation.unknown_field", "field is not declared on this model"));
            }
        }

        if issues.is_empty() { Ok(()) } else { Err(SchemaError::new(issues)) }
    }

    /// Whether `other` declares the same field table and unique constraints
    /// as `self`, ignoring declaration order and `model_name`. Used by
    /// `registry::register` to decide whether a re-registration is the
    /// idempotent no-op case or a genuine shape conflict.
    pub fn same_shape(&self, other: &EntityDescriptor) -> bool {
        let mut mine: Vec<String> = self.fields.iter().map(|field| format!("{field:?}")).collect();
        let mut theirs: Vec<String> = other.fields.iter().map(|field| format!("{field:?}")).collect();
        mine.sort();
        theirs.sort();

        let mut my_constraints: Vec<String> = self.unique_constraints.iter().map(|c| format!("{c:?}")).collect();
        let mut their_constraints: Vec<String> = other.unique_constraints.iter().map(|c| format!("{c:?}")).collect();
        my_constraints.sort();
        their_constraints.sort();

        mine == theirs && my_constraints == their_constraints
    }
}

fn validate_type(attr: &Attribute, value: &JsonValue) -> Result<(), ValidationIssue> {
    let matches = match attr.field_type {
        FieldType::Bool => value.is_boolean(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
        FieldType::String => value.is_string(),
        FieldType::Timestamp => value.is_string(),
    };
    if matches {
        Ok(())
    } else {
        Err(ValidationIssue::new(
            &attr.name,
            "validation.type",
            format!("expected {:?}, got {value}"),
        ))
    }
}

fn validate_rules(attr: &Attribute, value: &JsonValue) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for rule in &attr.validation_rules {
        match rule {
            ValidationRule::Length { min, max } => {
                if let Some(text) = value.as_str() {
                    let len = text.chars().count();
                    if min.is_some_and(|min| len < min) || max.is_some_and(|max| len > max) {
                        issues.push(ValidationIssue::new(&attr.name, "validation.length", "length out of bounds"));
                    }
                }
            }
            ValidationRule::Range { min, max } => {
                if let Some(number) = value.as_f64() {
                    if min.is_some_and(|min| number < min) || max.is_some_and(|max| number > max) {
                        issues.push(ValidationIssue::new(&attr.name, "validation.range", "value out of bounds"));
                    }
                }
            }
            ValidationRule::Enum { allowed } => {
                if let Some(text) = value.as_str() {
                    if !allowed.iter().any(|candidate| candidate == text) {
                        issues.push(ValidationIssue::new(&attr.name, "validation.enum", "value not in allowed set"));
                    }
                }
            }
        }
    }
    if let Some(max_size) = attr.max_size {
        if let Some(text) = value.as_str() {
            if text.chars().count() > max_size {
                issues.push(ValidationIssue::new(&attr.name, "validation.max_size", "exceeds max_size"));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new("student")
            .with_attribute(Attribute::new("name", FieldType::String).required())
            .with_attribute(Attribute::new("age", FieldType::Int).with_rule(ValidationRule::Range {
                min: Some(0.0),
                max: None,
            }))
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let values = BTreeMap::new();
        let err = descriptor().validate_fields(&values).unwrap_err();
        assert_eq!(err.issues[0].field, "name");
    }

    #[test]
    fn wrong_type_is_rejected() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), json!(42));
        let err = descriptor().validate_fields(&values).unwrap_err();
        assert!(err.issues.iter().any(|issue| issue.code == "validation.type"));
    }

    #[test]
    fn out_of_range_is_rejected() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), json!("Ada"));
        values.insert("age".to_string(), json!(-1));
        let err = descriptor().validate_fields(&values).unwrap_err();
        assert!(err.issues.iter().any(|issue| issue.field == "age"));
    }

    #[test]
    fn valid_entity_passes() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), json!("Ada"));
        values.insert("age".to_string(), json!(30));
        assert!(descriptor().validate_fields(&values).is_ok());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut values = BTreeMap::new();
        values.insert("name".to_string(), json!("Ada"));
        values.insert("nickname".to_string(), json!("Ada the Great"));
        let err = descriptor().validate_fields(&values).unwrap_err();
        assert!(err.issues.iter().any(|issue| issue.field == "nickname" && issue.code == "validation.unknown_field"));
    }

    #[test]
    fn same_shape_ignores_field_order() {
        let a = EntityDescriptor::new("x")
            .with_attribute(Attribute::new("name", FieldType::String))
            .with_attribute(Attribute::new("age", FieldType::Int));
        let b = EntityDescriptor::new("x")
            .with_attribute(Attribute::new("age", FieldType::Int))
            .with_attribute(Attribute::new("name", FieldType::String));
        assert!(a.same_shape(&b));
    }

    #[test]
    fn same_shape_detects_a_changed_type() {
        let a = EntityDescriptor::new("x").with_attribute(Attribute::new("age", FieldType::Int));
        let b = EntityDescriptor::new("x").with_attribute(Attribute::new("age", FieldType::String));
        assert!(!a.same_shape(&b));
    }
}
