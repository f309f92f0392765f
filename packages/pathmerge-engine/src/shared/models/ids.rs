//! Newtype ids for engine-owned objects
//!
//! All counters backing these ids live on the runtime instance; there are
//! no process-wide registries.

use pathmerge_store::{ElementId, PathId};
use serde::{Deserialize, Serialize};

/// Identifies one indexer (one tree) within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexerId(pub u32);

/// Identifies one merge group within a runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

/// Identifies an external order service registered with the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderServiceId(pub u32);

/// Identifies an external comparison function registered for cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComparisonId(pub u32);

/// Identifies an end-of-cycle completion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionTaskId(pub u32);

/// Addresses one dirty path node: which indexer's tree, which path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathNodeKey {
    pub indexer: IndexerId,
    pub path: PathId,
}

impl PathNodeKey {
    pub fn new(indexer: IndexerId, path: PathId) -> Self {
        Self { indexer, path }
    }
}

/// Allocator for synthetic element ids (identity nodes, translated target
/// ids). Seeded well above the range data elements use so the two can never
/// collide without coordination.
#[derive(Debug, Clone)]
pub struct IdAlloc {
    next: u32,
}

impl IdAlloc {
    const SYNTHETIC_BASE: u32 = 1 << 30;

    pub fn new() -> Self {
        Self {
            next: Self::SYNTHETIC_BASE,
        }
    }

    pub fn next(&mut self) -> ElementId {
        let id = ElementId(self.next);
        self.next += 1;
        id
    }

    pub fn is_synthetic(element: ElementId) -> bool {
        element.0 >= Self::SYNTHETIC_BASE
    }
}

impl Default for IdAlloc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_alloc_is_monotonic_and_synthetic() {
        let mut alloc = IdAlloc::new();
        let a = alloc.next();
        let b = alloc.next();
        assert!(b.0 > a.0);
        assert!(IdAlloc::is_synthetic(a));
        assert!(!IdAlloc::is_synthetic(ElementId(17)));
    }
}
