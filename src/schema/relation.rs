//! Relation field descriptors.
//!
//! The four relation kinds and their forward/inverse storage shapes are
//! grounded directly in
//! `original_source/python/teatype/hsdb/indices/RelationalIndex.py`:
//! one-to-one stores a scalar on both sides, many-to-one stores a list on the
//! "many" side's inverse, one-to-many is many-to-one with the owning side
//! swapped, many-to-many stores id lists on both sides with no inverse map at
//! all.

use serde::{Deserialize, Serialize};

/// Cardinality of a relation, named to describe the relation itself
/// (`OneToOne`/`ManyToOne`/`OneToMany`/`ManyToMany`) rather than one side of
/// it, which is what this crate's symmetric forward/inverse index model
/// needs. `OneToMany` is distinct from the inverse of `ManyToOne`: a
/// university's direct `students` field is declared `OneToMany`, and keys
/// its own `relation_key` rather than reusing the student's `university_id`
/// relation's key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// What happens to the other side of a relation when an entity is deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Delete the related entity/entities too.
    Delete,
    /// Remove the relation edge but leave the related entity alone.
    Detach,
    /// Leave the edge dangling; callers must clean up.
    None,
}

/// Descriptor for a relation field.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub target_model: String,
    pub kind: RelationKind,
    pub cascade: CascadePolicy,
    pub required: bool,
}

impl Relation {
    pub fn new(name: impl Into<String>, target_model: impl Into<String>, kind: RelationKind) -> Self {
        Self { name: name.into(), target_model: target_model.into(), kind, cascade: CascadePolicy::None, required: false }
    }

    pub fn with_cascade(mut self, cascade: CascadePolicy) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The `<primary_model>_<relation_type>_<secondary_model>` naming scheme
    /// used by the original's `RelationalIndex` to key its forward map.
    pub fn relation_key(&self, primary_model: &str) -> String {
        relation_key(primary_model, self.kind, &self.target_model)
    }

    /// Whether this relation keeps an inverse (reverse) map. Many-to-many
    /// stores both sides' id lists directly and has no separate inverse
    /// index, per the original.
    pub fn has_inverse(&self) -> bool {
        !matches!(self.kind, RelationKind::ManyToMany)
    }
}

/// Free-standing form of `Relation::relation_key`, usable when only the
/// relation's kind and target are known (e.g. from an `IncomingRelation`).
pub fn relation_key(primary_model: &str, kind: RelationKind, target_model: &str) -> String {
    let kind = match kind {
        RelationKind::OneToOne => "one_to_one",
        RelationKind::ManyToOne => "many_to_one",
        RelationKind::OneToMany => "one_to_many",
        RelationKind::ManyToMany => "many_to_many",
    };
    format!("{primary_model}_{kind}_{target_model}")
}
