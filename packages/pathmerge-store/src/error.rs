//! Error types for pathmerge-store

use thiserror::Error;

/// Errors surfaced across the store boundary.
///
/// Engine-internal invariant violations are not represented here; those are
/// caller defects and are caught by debug assertions on the engine side.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Path id was never allocated or has been fully released
    #[error("unknown path id {0}")]
    UnknownPath(u32),

    /// Releasing a path whose reference count is already zero
    #[error("path id {0} has no outstanding references")]
    UnreferencedPath(u32),

    /// Node lookup failed
    #[error("unknown node at path {path} element {element}")]
    UnknownNode { path: u32, element: u32 },

    /// Adding a node that already exists at its address
    #[error("duplicate node at path {path} element {element}")]
    DuplicateNode { path: u32, element: u32 },

    /// Adding a node whose declared parent is not present
    #[error("missing parent at path {path} element {element}")]
    MissingParent { path: u32, element: u32 },
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
