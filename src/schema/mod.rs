//! Field descriptors and the process-wide schema registry.

mod attribute;
mod descriptor;
mod registry;
mod relation;

pub use attribute::{Attribute, FieldType, ValidationRule};
pub use descriptor::{EntityDescriptor, FieldKind, UniqueConstraint};
pub use registry::{describe, derive_collection_name, find_incoming_relations, register, serialize, validate, IncomingRelation};
pub use relation::{relation_key, CascadePolicy, Relation, RelationKind};
