//! Domain model for the path-addressed store

pub mod node;
pub mod value;

pub use node::{ElementId, IdentificationId, NodeKey, NodeKind, NodeRecord, PathId};
pub use value::{Identity, SimpleValue};
