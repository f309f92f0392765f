//! Per-group reference counting
//!
//! Counts how many times each merged source element id (after raising) is
//! referenced by this group's contributing mappings. A 0→1 transition is
//! the only event that causes a merge; a decrement to exactly 0 is the only
//! event that causes a removal. Counts are maintained unconditionally; the
//! `ref_count_nonzero` shortcut is a read-only accessor over the same
//! table, so the two can never diverge.

use crate::shared::models::ids::GroupId;
use pathmerge_store::ElementId;
use rustc_hash::FxHashMap;

/// Reference-count table plus raised/operator bookkeeping for one group.
#[derive(Debug, Default)]
pub struct SourceNodes {
    counts: FxHashMap<ElementId, u32>,
    /// Operand counts per operator element; gate propagation of the
    /// highest operator, not of individual operands.
    operator_counts: FxHashMap<ElementId, u32>,
    /// For non-maximal groups: which (maximal group, element) pairs
    /// produced each raised element.
    contributors: FxHashMap<ElementId, Vec<(GroupId, ElementId)>>,
}

impl SourceNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a reference; true on the 0→1 transition.
    pub fn increment(&mut self, id: ElementId) -> bool {
        let count = self.counts.entry(id).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a reference; true when the count reaches exactly 0.
    ///
    /// Decrementing an uncounted id is an engine-invariant defect: every
    /// removed id must previously have been produced by this same object.
    pub fn decrement(&mut self, id: ElementId) -> bool {
        match self.counts.get_mut(&id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&id);
                true
            }
            None => {
                debug_assert!(false, "decrement of uncounted element {}", id.0);
                false
            }
        }
    }

    /// Count an operand of `operator`; true when the operator's operand
    /// count transitions 0→1.
    pub fn increment_operator(&mut self, operator: ElementId) -> bool {
        let count = self.operator_counts.entry(operator).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn decrement_operator(&mut self, operator: ElementId) -> bool {
        match self.operator_counts.get_mut(&operator) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.operator_counts.remove(&operator);
                true
            }
            None => {
                debug_assert!(false, "decrement of uncounted operator {}", operator.0);
                false
            }
        }
    }

    pub fn ref_count(&self, id: ElementId) -> u32 {
        self.counts
            .get(&id)
            .or_else(|| self.operator_counts.get(&id))
            .copied()
            .unwrap_or(0)
    }

    /// Shortcut for callers that already know the element matched: the
    /// count is read the same way, the precondition is only asserted.
    pub fn ref_count_nonzero(&self, id: ElementId) -> u32 {
        let count = self.ref_count(id);
        debug_assert!(count > 0, "element {} has no references", id.0);
        count
    }

    pub fn is_counted(&self, id: ElementId) -> bool {
        self.ref_count(id) > 0
    }

    /// All currently counted element ids, sorted for determinism.
    pub fn counted_elements(&self) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = self
            .counts
            .keys()
            .chain(self.operator_counts.keys())
            .copied()
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn add_contributor(&mut self, raised: ElementId, origin: (GroupId, ElementId)) {
        self.contributors.entry(raised).or_default().push(origin);
    }

    pub fn remove_contributor(&mut self, raised: ElementId, origin: (GroupId, ElementId)) {
        if let Some(list) = self.contributors.get_mut(&raised) {
            if let Some(pos) = list.iter().position(|o| *o == origin) {
                list.swap_remove(pos);
            }
            if list.is_empty() {
                self.contributors.remove(&raised);
            }
        }
    }

    /// The (maximal group, element) pairs that produced a raised element.
    pub fn origins(&self, raised: ElementId) -> &[(GroupId, ElementId)] {
        self.contributors
            .get(&raised)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty() && self.operator_counts.is_empty()
    }
}
