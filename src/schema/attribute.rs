//! Scalar field descriptors.
//!
//! Field descriptor and validation rule shapes, narrowed to the
//! supported-type list enforced by
//! `original_source/python/teatype/hsdb/HSDBAttribute.py`
//! (`_SUPPORTED_TYPES = [bool, dt, float, int, str]`).

use serde::{Deserialize, Serialize};

/// The scalar type a field's values must conform to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Bool,
    Int,
    Float,
    String,
    Timestamp,
}

/// A single constraint evaluated during `schema::validate` beyond the bare
/// type check (teacher's `ValidationRule`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// String length bounds, inclusive.
    Length { min: Option<usize>, max: Option<usize> },
    /// Numeric bounds, inclusive.
    Range { min: Option<f64>, max: Option<f64> },
    /// Value must match one of the given strings.
    Enum { allowed: Vec<String> },
}

/// Descriptor for a plain (non-relation) field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub field_type: FieldType,

    /// Must be present on every entity of this model.
    pub required: bool,

    /// May be changed by `update` after creation.
    pub editable: bool,

    /// Derived rather than caller-supplied; implies `required && !editable`.
    pub computed: bool,

    /// Enforced globally (or per compound constraint) by the storage engine.
    pub unique: bool,

    /// Opts the field into the `(model, field) -> value -> id-set` field
    /// index. Fields not marked `indexed` are never placed in it: `find_by`
    /// and `where_field(...).equals(...)` see them as always-empty.
    pub indexed: bool,

    /// Eligible for `Query::contains` substring matching.
    pub searchable: bool,

    /// Free-text doc string surfaced by `schema::describe` (carried forward
    /// from the original's field metadata, dropped by the distilled spec but
    /// harmless and useful for introspection).
    pub description: Option<String>,

    /// Maximum string length / collection size, where applicable.
    pub max_size: Option<usize>,

    pub validation_rules: Vec<ValidationRule>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            editable: true,
            computed: false,
            unique: false,
            indexed: false,
            searchable: false,
            description: None,
            max_size: None,
            validation_rules: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self.required = true;
        self.editable = false;
        self
    }

    /// Unique fields must be looked up by value to check for collisions, so
    /// this implies `indexed`.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.indexed = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    /// Mirrors `HSDBAttribute.__init__`'s internal consistency check: a
    /// computed field can never be editable, and must be required (the
    /// engine always fills it in, so treating it as optional is meaningless).
    pub fn is_internally_consistent(&self) -> bool {
        if self.computed { self.required && !self.editable } else { true }
    }
}
