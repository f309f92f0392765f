//! pathmerge-store: hierarchical, path-addressed node store
//!
//! The "Path Index" side of the pathmerge workspace. Nodes are addressed by
//! `(PathId, ElementId)`; paths are interned attribute chains with explicit
//! reference counts. The merge engine in `pathmerge-engine` reads and writes
//! through this crate's deliberately narrow API and never reaches into the
//! store's internals.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::{
    ElementId, Identity, IdentificationId, NodeKey, NodeKind, NodeRecord, PathId, SimpleValue,
};
pub use error::{Result, StoreError};
pub use infrastructure::memory::PathIndex;
