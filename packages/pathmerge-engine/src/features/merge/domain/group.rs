//! The merge group
//!
//! One group per declared mapping rule. A group accepts gap-preserving
//! arrays of source element ids, raises them across unmapped intermediate
//! data elements to its own source path, reference-counts them (with
//! operator raising where the source path holds operator/operand
//! structure), applies identity semantics when it is an identity group, and
//! hands the surviving ids to the next level of its chain. The chain walk
//! itself lives in the merge runtime; this type implements one level.

use crate::features::merge::domain::comparison::DominatedComparison;
use crate::features::merge::domain::identity_nodes::IdentityNodes;
use crate::features::merge::domain::source_nodes::SourceNodes;
use crate::features::merge::domain::target_map::TargetIdMap;
use crate::shared::models::delta::{IdentityDelta, Slot};
use crate::shared::models::group::{GroupDescriptor, MappingKey};
use crate::shared::models::ids::{ComparisonId, GroupId, IdAlloc};
use pathmerge_store::{ElementId, Identity, NodeKey, NodeKind, PathId, PathIndex, SimpleValue};
use rustc_hash::FxHashSet;
use tracing::trace;

/// What one group produced for one add/remove call.
///
/// `merged` holds the ids this group newly merged (or un-merged): source
/// ids, operator ids, or identity-node ids. `carry` holds the raised
/// source ids handed to the prefix group; both are index-aligned with the
/// input and gap-preserving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelOutcome {
    pub merged: Vec<Slot>,
    pub carry: Vec<Slot>,
}

#[derive(Debug)]
pub struct MergeGroup {
    pub id: GroupId,
    pub desc: GroupDescriptor,
    /// Back-reference toward the minimal group; `None` on the minimal
    /// group itself.
    pub prefix_group: Option<GroupId>,
    /// Forward adjacency, maintained by the runtime.
    pub next_groups: Vec<GroupId>,
    /// Set when ≥2 sibling groups share (prefix, priority) and target
    /// path: the merge indexer must keep their contributions
    /// distinguishable.
    pub obligatory_data_elements: bool,

    mappings: FxHashSet<MappingKey>,
    pub(crate) source_nodes: SourceNodes,
    pub(crate) identity_nodes: IdentityNodes,
    pub(crate) target_ids: TargetIdMap,

    /// Scheduler idempotency flag for identity updates.
    pub(crate) identity_update_scheduled: bool,
    pub(crate) pending_identity_updates: Vec<(ElementId, Identity)>,
}

impl MergeGroup {
    pub fn new(id: GroupId, desc: GroupDescriptor, prefix_group: Option<GroupId>) -> Self {
        Self {
            id,
            desc,
            prefix_group,
            next_groups: Vec::new(),
            obligatory_data_elements: false,
            mappings: FxHashSet::default(),
            source_nodes: SourceNodes::new(),
            identity_nodes: IdentityNodes::new(),
            target_ids: TargetIdMap::new(),
            identity_update_scheduled: false,
            pending_identity_updates: Vec::new(),
        }
    }

    // ── Mapping lifecycle ─────────────────────────────────────────────

    /// Attach a (result, projection) mapping. Returns false when the
    /// mapping was already attached.
    pub fn add_mapping(&mut self, key: MappingKey) -> bool {
        self.mappings.insert(key)
    }

    /// Detach a mapping; returns true when the group's mapping set is now
    /// empty and the group must be destroyed. Removing a never-added
    /// mapping is an engine-invariant defect.
    pub fn remove_mapping(&mut self, key: MappingKey) -> bool {
        let removed = self.mappings.remove(&key);
        debug_assert!(removed, "mapping {:?} was never added", key);
        self.mappings.is_empty()
    }

    pub fn mapping_count(&self) -> usize {
        self.mappings.len()
    }

    // ── Incremental propagation (one chain level) ─────────────────────

    /// Absorb added elements at this level.
    ///
    /// `from_path` is the previous (more specific) group's source path;
    /// `None` on the maximal group, whose ids arrive unraised at its own
    /// path. `origins` carries the maximal-level input ids for contributor
    /// bookkeeping on non-maximal groups.
    pub fn absorb_added(
        &mut self,
        src: &PathIndex,
        slots: &[Slot],
        from_path: Option<PathId>,
        origins: &[Slot],
        head: GroupId,
        alloc: &mut IdAlloc,
    ) -> LevelOutcome {
        let mut merged = Vec::with_capacity(slots.len());
        let mut carry = Vec::with_capacity(slots.len());

        for (i, slot) in slots.iter().enumerate() {
            let Some(id) = *slot else {
                merged.push(None);
                carry.push(None);
                continue;
            };
            let raised = self.raise(src, id, from_path);
            let (counted, is_operator) = self.operator_target(src, raised);
            let first = if is_operator {
                self.source_nodes.increment_operator(counted)
            } else {
                self.source_nodes.increment(counted)
            };
            if from_path.is_some() {
                if let Some(origin) = origins.get(i).copied().flatten() {
                    self.source_nodes.add_contributor(counted, (head, origin));
                }
            }
            trace!(
                group = self.id.0,
                element = counted.0,
                first,
                "absorb added"
            );

            let carry_slot = if first { Some(counted) } else { None };
            let merged_slot = if self.desc.is_identity {
                if first {
                    let identity = self.source_identity(src, counted);
                    let (node, fresh) = self.identity_nodes.bind(counted, identity, alloc);
                    if fresh {
                        Some(node)
                    } else {
                        None
                    }
                } else {
                    None
                }
            } else {
                carry_slot
            };
            merged.push(merged_slot);
            carry.push(carry_slot);
        }

        LevelOutcome { merged, carry }
    }

    /// Mirror of `absorb_added`: counts decrement, a transition to zero
    /// signals removal, identity bookkeeping unwinds symmetrically.
    pub fn absorb_removed(
        &mut self,
        src: &PathIndex,
        slots: &[Slot],
        from_path: Option<PathId>,
        origins: &[Slot],
        head: GroupId,
    ) -> LevelOutcome {
        let mut merged = Vec::with_capacity(slots.len());
        let mut carry = Vec::with_capacity(slots.len());

        for (i, slot) in slots.iter().enumerate() {
            let Some(id) = *slot else {
                merged.push(None);
                carry.push(None);
                continue;
            };
            let raised = self.raise(src, id, from_path);
            let (counted, is_operator) = self.operator_target(src, raised);
            let last = if is_operator {
                self.source_nodes.decrement_operator(counted)
            } else {
                self.source_nodes.decrement(counted)
            };
            if from_path.is_some() {
                if let Some(origin) = origins.get(i).copied().flatten() {
                    self.source_nodes
                        .remove_contributor(counted, (head, origin));
                }
            }
            trace!(
                group = self.id.0,
                element = counted.0,
                last,
                "absorb removed"
            );

            let carry_slot = if last { Some(counted) } else { None };
            let merged_slot = if self.desc.is_identity {
                if last {
                    match self.identity_nodes.unbind(counted) {
                        Some((node, true)) => Some(node),
                        _ => None,
                    }
                } else {
                    None
                }
            } else {
                carry_slot
            };
            merged.push(merged_slot);
            carry.push(carry_slot);
        }

        LevelOutcome { merged, carry }
    }

    /// Source-parent id of each survivor, computed by the minimal group so
    /// the collaborator can find the correct dominating target node. Root
    /// element 0 means "directly under the root".
    pub fn add_source_parents(&self, src: &PathIndex, carry: &[Slot]) -> Vec<Slot> {
        carry
            .iter()
            .map(|slot| {
                slot.map(|id| {
                    src.parent_of(NodeKey::new(self.desc.source_path, id))
                        .map(|p| p.element)
                        .unwrap_or(ElementId::ROOT)
                })
            })
            .collect()
    }

    // ── Raising primitives ────────────────────────────────────────────

    fn raise(&self, src: &PathIndex, id: ElementId, from_path: Option<PathId>) -> ElementId {
        let Some(from) = from_path else { return id };
        if from == self.desc.source_path {
            return id;
        }
        match src.element_at(NodeKey::new(from, id), self.desc.source_path) {
            Some(raised) => raised,
            None => {
                debug_assert!(
                    false,
                    "element {} has no ancestor at path {}",
                    id.0, self.desc.source_path.0
                );
                id
            }
        }
    }

    /// Topmost operator ancestor at this group's source path, if the
    /// element is an operand of operator/operand structure there.
    fn operator_target(&self, src: &PathIndex, id: ElementId) -> (ElementId, bool) {
        let mut key = NodeKey::new(self.desc.source_path, id);
        let mut top = None;
        while let Some(parent) = src.parent_of(key) {
            if parent.path != self.desc.source_path {
                break;
            }
            match src.node(parent) {
                Some(node) if node.kind == NodeKind::Operator => {
                    top = Some(parent.element);
                    key = parent;
                }
                _ => break,
            }
        }
        match top {
            Some(op) => (op, true),
            None => (id, false),
        }
    }

    // ── Identity updates ──────────────────────────────────────────────

    /// Apply buffered identity changes. Only identity groups react; the
    /// underlying source elements are neither added nor removed.
    pub fn update_identity(
        &mut self,
        updates: &[(ElementId, Identity)],
        alloc: &mut IdAlloc,
    ) -> IdentityDelta {
        let mut delta = IdentityDelta::default();
        if !self.desc.is_identity {
            return delta;
        }
        for (source, identity) in updates {
            // Elements not currently merged are ignored; their identity
            // will be read fresh if they arrive later.
            if !self.identity_nodes.is_bound(*source) {
                continue;
            }
            let (old, new) = self.identity_nodes.rebind(*source, identity.clone(), alloc);
            if let Some((node, true)) = old {
                delta.removed.push(node);
            }
            if new.1 {
                delta.added.push(new.0);
            }
        }
        delta
    }

    pub fn buffer_identity_updates(&mut self, ids: &[ElementId], identities: &[Identity]) {
        debug_assert_eq!(ids.len(), identities.len());
        for (id, identity) in ids.iter().zip(identities) {
            self.pending_identity_updates.push((*id, identity.clone()));
        }
    }

    pub fn take_pending_identity_updates(&mut self) -> Vec<(ElementId, Identity)> {
        std::mem::take(&mut self.pending_identity_updates)
    }

    // ── Read-only queries ─────────────────────────────────────────────

    /// The identity of a source element: the assigned identity when the
    /// group carries a source identification, else the element's value,
    /// else the element itself.
    pub fn source_identity(&self, src: &PathIndex, id: ElementId) -> Identity {
        if let Some(ident_id) = self.desc.source_identification {
            if let Some(identity) = src.identity(ident_id, id) {
                return identity.clone();
            }
        }
        if let Some(value) = src.value(NodeKey::new(self.desc.source_path, id)) {
            return Identity::Value(value.clone());
        }
        Identity::Key(id.0 as u64)
    }

    pub fn source_identities(&self, src: &PathIndex, ids: &[ElementId]) -> Vec<Identity> {
        ids.iter().map(|id| self.source_identity(src, *id)).collect()
    }

    /// Read-through to the raw source value of a merged element.
    pub fn source_value(&self, src: &PathIndex, id: ElementId) -> Option<SimpleValue> {
        src.value(NodeKey::new(self.desc.source_path, id)).cloned()
    }

    /// Non-attribute children of a merged element in the source tree.
    pub fn source_data_children(&self, src: &PathIndex, id: ElementId) -> Vec<ElementId> {
        src.children_of(NodeKey::new(self.desc.source_path, id))
            .iter()
            .filter(|child| {
                src.node(**child)
                    .is_some_and(|n| n.kind != NodeKind::Attribute)
            })
            .map(|child| child.element)
            .collect()
    }

    /// Counted elements dominated by any element of `ancestors` in the
    /// source tree. Sorted for determinism.
    pub fn dominated_by(&self, src: &PathIndex, ancestors: &[ElementId]) -> Vec<ElementId> {
        let ancestor_set: FxHashSet<ElementId> = ancestors.iter().copied().collect();
        let mut out = Vec::new();
        for id in self.source_nodes.counted_elements() {
            let mut key = NodeKey::new(self.desc.source_path, id);
            while let Some(parent) = src.parent_of(key) {
                if ancestor_set.contains(&parent.element) {
                    out.push(id);
                    break;
                }
                key = parent;
            }
        }
        out
    }

    /// The (maximal group, element) pairs that produced one of this
    /// group's raised elements. Meaningful on non-maximal groups.
    pub fn maximal_origins(&self, raised: ElementId) -> &[(GroupId, ElementId)] {
        self.source_nodes.origins(raised)
    }

    pub fn ref_count(&self, id: ElementId) -> u32 {
        self.source_nodes.ref_count(id)
    }

    /// Identity-node id currently merged for `identity`, if any.
    pub fn identity_node(&self, identity: &Identity) -> Option<ElementId> {
        self.identity_nodes.node_for(identity)
    }

    /// Reference count when the caller already knows the element matched.
    pub fn ref_count_nonzero(&self, id: ElementId) -> u32 {
        self.source_nodes.ref_count_nonzero(id)
    }

    /// Ordering descriptor: the upstream comparator, wrapped with
    /// identity-based tie-breaking when this is an identity group.
    pub fn dominated_comparison(&self, base: Option<ComparisonId>) -> DominatedComparison {
        if self.desc.is_identity {
            DominatedComparison::with_identity_tiebreak(
                self.id,
                base,
                self.desc.source_identification,
            )
        } else {
            DominatedComparison::plain(self.id, base)
        }
    }
}
