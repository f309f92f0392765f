//! Merge delta shapes
//!
//! Slot arrays are gap-preserving: an empty slot means "already handled by
//! a sibling contributor within this same call; keep array alignment, do no
//! further work". Gaps are a normal signal, never an error.

use crate::shared::models::ids::GroupId;
use pathmerge_store::ElementId;
use serde::{Deserialize, Serialize};

/// One position in a gap-preserving element-id array.
pub type Slot = Option<ElementId>;

/// The ids one group contributed for one add/remove call, index-aligned
/// with the original input array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSlots {
    pub group: GroupId,
    pub ids: Vec<Slot>,
}

/// Trailer of a merge outcome, produced by the minimal group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeTail {
    /// Minimal group merged into a non-root target path: the source-parent
    /// id of each survivor, so the collaborator can find the dominating
    /// target node. Root element `0` means "directly under the root".
    ParentIds(Vec<Slot>),
    /// Minimal group merged into the target root: marks which slots were
    /// newly merged (0→1), used only to disambiguate reference-count ties.
    NewlyMerged(Vec<bool>),
}

/// Result of propagating one add/remove call through a full group chain:
/// one row per group, maximal first, minimal last, plus the tail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub rows: Vec<GroupSlots>,
    pub tail: MergeTail,
}

impl MergeOutcome {
    /// The minimal group's row.
    pub fn minimal(&self) -> Option<&GroupSlots> {
        self.rows.last()
    }

    /// True when no group in the chain propagated anything.
    pub fn is_silent(&self) -> bool {
        self.rows.iter().all(|row| row.ids.iter().all(Slot::is_none))
    }
}

/// Identity-node deltas produced by an identity update: the underlying
/// source elements are neither added nor removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityDelta {
    pub added: Vec<ElementId>,
    pub removed: Vec<ElementId>,
}

impl IdentityDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_outcome() {
        let outcome = MergeOutcome {
            rows: vec![GroupSlots {
                group: GroupId(1),
                ids: vec![None, None],
            }],
            tail: MergeTail::NewlyMerged(vec![false, false]),
        };
        assert!(outcome.is_silent());
    }
}
