//! Identity-node bookkeeping for identity groups
//!
//! An identity group merges a synthetic identity-node id per distinct
//! identity value instead of the source element id. Bindings remember which
//! identity each source element acquired, so removal and identity updates
//! unwind correctly even after the store-side assignment changed.
//!
//! `children_by_identity` is a pending-attachment table keyed by identity
//! value: children store the identity of their dominating parent, never a
//! pointer to a not-yet-existing parent object.

use crate::shared::models::ids::{GroupId, IdAlloc};
use pathmerge_store::{ElementId, Identity, PathId};
use rustc_hash::FxHashMap;

/// A child waiting for its dominating parent's identity node to appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingChild {
    /// The group that merged the child.
    pub group: GroupId,
    /// The child's merged id (identity node or source id).
    pub element: ElementId,
    /// Target path the child belongs at.
    pub path: PathId,
}

#[derive(Debug, Default)]
pub struct IdentityNodes {
    by_identity: FxHashMap<Identity, ElementId>,
    by_node: FxHashMap<ElementId, Identity>,
    counts: FxHashMap<ElementId, u32>,
    /// Which identity each merged source element is bound to.
    by_source: FxHashMap<ElementId, Identity>,
    pending_children: FxHashMap<Identity, Vec<PendingChild>>,
}

impl IdentityNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `source` to `identity`, allocating the identity node on first
    /// use. Returns the identity-node id and whether its count went 0→1.
    pub fn bind(
        &mut self,
        source: ElementId,
        identity: Identity,
        alloc: &mut IdAlloc,
    ) -> (ElementId, bool) {
        debug_assert!(
            !self.by_source.contains_key(&source),
            "element {} already bound",
            source.0
        );
        let node = match self.by_identity.get(&identity) {
            Some(&node) => node,
            None => {
                let node = alloc.next();
                self.by_identity.insert(identity.clone(), node);
                self.by_node.insert(node, identity.clone());
                node
            }
        };
        let count = self.counts.entry(node).or_insert(0);
        *count += 1;
        let fresh = *count == 1;
        self.by_source.insert(source, identity);
        (node, fresh)
    }

    /// Unbind `source`. Returns the identity-node id and whether its count
    /// reached zero (node mappings are dropped then).
    pub fn unbind(&mut self, source: ElementId) -> Option<(ElementId, bool)> {
        let identity = self.by_source.remove(&source);
        debug_assert!(identity.is_some(), "element {} was never bound", source.0);
        let identity = identity?;
        let node = *self.by_identity.get(&identity)?;
        let count = self.counts.get_mut(&node)?;
        if *count > 1 {
            *count -= 1;
            return Some((node, false));
        }
        self.counts.remove(&node);
        self.by_identity.remove(&identity);
        self.by_node.remove(&node);
        Some((node, true))
    }

    /// Move `source` to a new identity. Returns `(old, new)` where each
    /// side reports the affected identity node and whether it crossed its
    /// zero boundary (removal for old, merge for new).
    pub fn rebind(
        &mut self,
        source: ElementId,
        identity: Identity,
        alloc: &mut IdAlloc,
    ) -> (Option<(ElementId, bool)>, (ElementId, bool)) {
        if self.by_source.get(&source) == Some(&identity) {
            // Identity unchanged: no node crosses zero.
            let node = self.by_identity[&identity];
            return (None, (node, false));
        }
        let old = self.unbind(source);
        let new = self.bind(source, identity, alloc);
        (old, new)
    }

    pub fn node_for(&self, identity: &Identity) -> Option<ElementId> {
        self.by_identity.get(identity).copied()
    }

    pub fn identity_of_node(&self, node: ElementId) -> Option<&Identity> {
        self.by_node.get(&node)
    }

    pub fn identity_of_source(&self, source: ElementId) -> Option<&Identity> {
        self.by_source.get(&source)
    }

    pub fn count(&self, node: ElementId) -> u32 {
        self.counts.get(&node).copied().unwrap_or(0)
    }

    pub fn is_bound(&self, source: ElementId) -> bool {
        self.by_source.contains_key(&source)
    }

    /// Every source element currently bound to `node`'s identity, sorted.
    pub fn sources_of_node(&self, node: ElementId) -> Vec<ElementId> {
        let Some(identity) = self.by_node.get(&node) else {
            return Vec::new();
        };
        let mut out: Vec<ElementId> = self
            .by_source
            .iter()
            .filter(|(_, i)| *i == identity)
            .map(|(s, _)| *s)
            .collect();
        out.sort();
        out
    }

    // ── Pending attachments ───────────────────────────────────────────

    pub fn queue_child(&mut self, parent_identity: Identity, child: PendingChild) {
        self.pending_children
            .entry(parent_identity)
            .or_default()
            .push(child);
    }

    /// Drop a waiting child wherever it is queued. Used when the child is
    /// un-merged before its parent ever arrived; the parent identity is no
    /// longer known at that point, so all lists are scanned.
    pub fn cancel_child_element(&mut self, element: ElementId) {
        for list in self.pending_children.values_mut() {
            list.retain(|c| c.element != element);
        }
        self.pending_children.retain(|_, list| !list.is_empty());
    }

    /// Drain every child waiting for `parent_identity`.
    pub fn take_children(&mut self, parent_identity: &Identity) -> Vec<PendingChild> {
        self.pending_children
            .remove(parent_identity)
            .unwrap_or_default()
    }

    pub fn has_pending_children(&self, parent_identity: &Identity) -> bool {
        self.pending_children.contains_key(parent_identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathmerge_store::SimpleValue;

    fn ident(s: &str) -> Identity {
        Identity::value(SimpleValue::Str(s.into()))
    }

    #[test]
    fn test_shared_identity_merges_once() {
        let mut table = IdentityNodes::new();
        let mut alloc = IdAlloc::new();

        let (node_a, fresh_a) = table.bind(ElementId(1), ident("x"), &mut alloc);
        let (node_b, fresh_b) = table.bind(ElementId(2), ident("x"), &mut alloc);

        assert_eq!(node_a, node_b);
        assert!(fresh_a);
        assert!(!fresh_b);
        assert_eq!(table.count(node_a), 2);
    }

    #[test]
    fn test_unbind_removes_only_at_zero() {
        let mut table = IdentityNodes::new();
        let mut alloc = IdAlloc::new();

        let (node, _) = table.bind(ElementId(1), ident("x"), &mut alloc);
        table.bind(ElementId(2), ident("x"), &mut alloc);

        assert_eq!(table.unbind(ElementId(1)), Some((node, false)));
        assert_eq!(table.unbind(ElementId(2)), Some((node, true)));
        assert_eq!(table.node_for(&ident("x")), None);
    }

    #[test]
    fn test_rebind_reports_both_boundaries() {
        let mut table = IdentityNodes::new();
        let mut alloc = IdAlloc::new();

        let (old_node, _) = table.bind(ElementId(1), ident("x"), &mut alloc);
        table.bind(ElementId(2), ident("x"), &mut alloc);

        // Element 1 moves away from the shared value: old count 2→1, no
        // removal; new node is fresh.
        let (old, new) = table.rebind(ElementId(1), ident("y"), &mut alloc);
        assert_eq!(old, Some((old_node, false)));
        assert!(new.1);

        // Element 2 moves too: old node finally drops.
        let (old, _) = table.rebind(ElementId(2), ident("y"), &mut alloc);
        assert_eq!(old, Some((old_node, true)));
    }

    #[test]
    fn test_rebind_same_identity_is_silent() {
        let mut table = IdentityNodes::new();
        let mut alloc = IdAlloc::new();

        let (node, _) = table.bind(ElementId(1), ident("x"), &mut alloc);
        let (old, new) = table.rebind(ElementId(1), ident("x"), &mut alloc);
        assert_eq!(old, None);
        assert_eq!(new, (node, false));
    }

    #[test]
    fn test_pending_children_round_trip() {
        let mut table = IdentityNodes::new();
        let child = PendingChild {
            group: GroupId(3),
            element: ElementId(5),
            path: PathId(2),
        };
        table.queue_child(ident("p"), child);
        assert!(table.has_pending_children(&ident("p")));

        let drained = table.take_children(&ident("p"));
        assert_eq!(drained, vec![child]);
        assert!(!table.has_pending_children(&ident("p")));
    }

    #[test]
    fn test_cancel_child_element_clears_all_lists() {
        let mut table = IdentityNodes::new();
        let child = PendingChild {
            group: GroupId(3),
            element: ElementId(5),
            path: PathId(2),
        };
        table.queue_child(ident("p"), child);
        table.cancel_child_element(ElementId(5));
        assert!(!table.has_pending_children(&ident("p")));
    }

    #[test]
    fn test_sources_of_node() {
        let mut table = IdentityNodes::new();
        let mut alloc = IdAlloc::new();
        let (node, _) = table.bind(ElementId(2), ident("x"), &mut alloc);
        table.bind(ElementId(1), ident("x"), &mut alloc);
        assert_eq!(table.sources_of_node(node), vec![ElementId(1), ElementId(2)]);
    }
}
