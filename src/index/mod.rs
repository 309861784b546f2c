//! The four independently-lockable sub-indices that back the storage engine.

mod field;
mod model;
mod primary;
mod relational;

pub use field::FieldIndex;
pub use model::ModelIndex;
pub use primary::PrimaryIndex;
pub use relational::RelationalIndex;
