//! The merge runtime
//!
//! Owns the target tree, the source trees, the group arena and the tables
//! that glue them together. Inbound calls (`add_source_elements`,
//! `remove_source_elements`, `update_identity`, mapping lifecycle) mutate
//! the trees eagerly; per-path-node finalization (change-log delivery,
//! order-service refreshes) is deferred through the update scheduler, whose
//! host side this type implements.
//!
//! The scheduler itself is owned by the caller and threaded through every
//! mutating call, so the executor can hand it back into the runtime's own
//! callbacks without aliasing.

use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::features::merge::domain::{LevelOutcome, MergeGroup, PendingChild};
use crate::features::scheduling::application::executor::UpdateScheduler;
use crate::features::scheduling::ports::ScheduleHost;
use crate::shared::models::delta::{GroupSlots, MergeOutcome, MergeTail, Slot};
use crate::shared::models::group::{GroupDescriptor, MappingKey};
use crate::shared::models::ids::{
    ComparisonId, CompletionTaskId, GroupId, IdAlloc, IndexerId, OrderServiceId, PathNodeKey,
};
use crate::shared::ports::hooks::{NoopHooks, RuntimeHooks};
use pathmerge_store::{
    ElementId, Identity, IdentificationId, NodeKey, NodeKind, PathId, PathIndex,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};

/// One entry in a path node's change log, drained by its epilogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChange {
    Added(ElementId),
    Removed(ElementId),
}

/// Per-path-node scheduling state. The scheduled flag is the idempotency
/// guard consulted before every `schedule_path_node`.
#[derive(Debug, Default)]
struct PathNodeState {
    scheduled: bool,
    changes: Vec<NodeChange>,
}

#[derive(Debug, Default)]
struct OrderServiceState {
    scheduled: bool,
}

/// Groups merging into one target path, with the priority bounds consumers
/// ask about.
#[derive(Debug, Default)]
struct TargetPathTable {
    groups: Vec<GroupId>,
    min_priority: i32,
    max_priority: i32,
}

/// Where a freshly merged node attaches in the target tree.
enum Dominating {
    Node(NodeKey),
    /// The dominating parent is an identity node that does not exist yet;
    /// the child waits in the prefix group's pending-attachment table.
    Pending(GroupId, Identity),
}

pub struct MergeRuntime<H: RuntimeHooks = NoopHooks> {
    config: EngineConfig,
    target_indexer: IndexerId,
    target: PathIndex,
    sources: FxHashMap<IndexerId, PathIndex>,
    alloc: IdAlloc,

    groups: FxHashMap<GroupId, MergeGroup>,
    by_description: FxHashMap<String, GroupId>,
    by_target_path: FxHashMap<PathId, TargetPathTable>,
    next_group: u32,

    /// Target node each (group, merged id) currently occupies.
    merged_targets: FxHashMap<(GroupId, ElementId), NodeKey>,

    /// Change observers on source paths: maximal non-identity groups that
    /// external delta producers route `add_source_elements` /
    /// `remove_source_elements` calls to when elements change there.
    source_observers: FxHashMap<(IndexerId, PathId), Vec<GroupId>>,

    path_nodes: FxHashMap<PathNodeKey, PathNodeState>,
    watchers: FxHashMap<PathId, Vec<OrderServiceId>>,
    order_services: FxHashMap<OrderServiceId, OrderServiceState>,
    comparisons: FxHashMap<ComparisonId, bool>,
    completions: FxHashMap<CompletionTaskId, bool>,
    cleanup_scheduled: FxHashMap<IndexerId, bool>,
    released: FxHashMap<IndexerId, Vec<ElementId>>,

    hooks: H,
}

impl MergeRuntime<NoopHooks> {
    pub fn new(config: EngineConfig, target: IndexerId) -> Result<Self> {
        Self::with_hooks(config, target, NoopHooks)
    }
}

impl<H: RuntimeHooks> MergeRuntime<H> {
    pub fn with_hooks(config: EngineConfig, target: IndexerId, hooks: H) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            target_indexer: target,
            target: PathIndex::new(),
            sources: FxHashMap::default(),
            alloc: IdAlloc::new(),
            groups: FxHashMap::default(),
            by_description: FxHashMap::default(),
            by_target_path: FxHashMap::default(),
            next_group: 1,
            merged_targets: FxHashMap::default(),
            source_observers: FxHashMap::default(),
            path_nodes: FxHashMap::default(),
            watchers: FxHashMap::default(),
            order_services: FxHashMap::default(),
            comparisons: FxHashMap::default(),
            completions: FxHashMap::default(),
            cleanup_scheduled: FxHashMap::default(),
            released: FxHashMap::default(),
            hooks,
        })
    }

    /// A scheduler sized from this runtime's configuration. The caller owns
    /// it and passes it back into every mutating call.
    pub fn make_scheduler(&self) -> UpdateScheduler {
        UpdateScheduler::with_capacity(self.config.path_heap_capacity)
    }

    // ── Tree access ───────────────────────────────────────────────────

    pub fn target(&self) -> &PathIndex {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut PathIndex {
        &mut self.target
    }

    /// Register (or re-open) a source indexer's tree.
    pub fn register_source(&mut self, id: IndexerId) -> &mut PathIndex {
        debug_assert!(id != self.target_indexer, "source id shadows the target");
        self.sources.entry(id).or_default()
    }

    pub fn source(&self, id: IndexerId) -> Result<&PathIndex> {
        self.sources
            .get(&id)
            .ok_or(EngineError::UnknownIndexer(id.0))
    }

    pub fn source_mut(&mut self, id: IndexerId) -> Result<&mut PathIndex> {
        self.sources
            .get_mut(&id)
            .ok_or(EngineError::UnknownIndexer(id.0))
    }

    // ── Group lifecycle ───────────────────────────────────────────────

    /// Register a group, deduplicating by description: a second declaration
    /// under a known description returns the existing group if it agrees,
    /// and errors if it conflicts.
    pub fn register_group(
        &mut self,
        desc: GroupDescriptor,
        prefix: Option<GroupId>,
    ) -> Result<GroupId> {
        if let Some(&existing) = self.by_description.get(&desc.description) {
            let group = self
                .groups
                .get(&existing)
                .ok_or(EngineError::UnknownGroup(existing.0))?;
            if group.desc != desc || group.prefix_group != prefix {
                return Err(EngineError::ConflictingGroup(desc.description));
            }
            return Ok(existing);
        }
        if !self.sources.contains_key(&desc.source_indexer) {
            return Err(EngineError::UnknownIndexer(desc.source_indexer.0));
        }
        if let Some(pid) = prefix {
            let pg = self
                .groups
                .get(&pid)
                .ok_or(EngineError::UnknownGroup(pid.0))?;
            debug_assert!(
                desc.chain_compatible(&pg.desc),
                "group {:?} cannot chain onto {:?}",
                desc.description,
                pg.desc.description
            );
        }

        let id = GroupId(self.next_group);
        self.next_group += 1;
        let group = MergeGroup::new(id, desc.clone(), prefix);
        if let Some(pid) = prefix {
            if let Some(pg) = self.groups.get_mut(&pid) {
                pg.next_groups.push(id);
            }
        }
        self.by_description.insert(desc.description.clone(), id);
        self.by_target_path
            .entry(desc.target_path)
            .or_default()
            .groups
            .push(id);
        self.groups.insert(id, group);
        self.refresh_priority_bounds(desc.target_path);
        self.refresh_obligatory(desc.target_path);
        // Maximal non-identity groups observe source changes directly;
        // identity groups are driven through the identity-update queue.
        if desc.is_maximal && !desc.is_identity {
            self.source_observers
                .entry((desc.source_indexer, desc.source_path))
                .or_default()
                .push(id);
        }
        debug!(
            group = id.0,
            description = %desc.description,
            maximal = desc.is_maximal,
            identity = desc.is_identity,
            "registered group"
        );
        Ok(id)
    }

    pub fn add_mapping(&mut self, gid: GroupId, key: MappingKey) -> Result<()> {
        let group = self
            .groups
            .get_mut(&gid)
            .ok_or(EngineError::UnknownGroup(gid.0))?;
        group.add_mapping(key);
        Ok(())
    }

    /// Detach a mapping; the group is destroyed when its mapping set
    /// empties. Returns whether destruction happened.
    pub fn remove_mapping(&mut self, gid: GroupId, key: MappingKey) -> Result<bool> {
        let group = self
            .groups
            .get_mut(&gid)
            .ok_or(EngineError::UnknownGroup(gid.0))?;
        if !group.remove_mapping(key) {
            return Ok(false);
        }
        self.destroy_group(gid)?;
        Ok(true)
    }

    fn destroy_group(&mut self, gid: GroupId) -> Result<()> {
        let group = self
            .groups
            .remove(&gid)
            .ok_or(EngineError::UnknownGroup(gid.0))?;
        self.by_description.remove(&group.desc.description);
        if let Some(pid) = group.prefix_group {
            if let Some(pg) = self.groups.get_mut(&pid) {
                pg.next_groups.retain(|g| *g != gid);
            }
        }
        if let Some(table) = self.by_target_path.get_mut(&group.desc.target_path) {
            table.groups.retain(|g| *g != gid);
            if table.groups.is_empty() {
                self.by_target_path.remove(&group.desc.target_path);
            }
        }
        let source_key = (group.desc.source_indexer, group.desc.source_path);
        if let Some(observers) = self.source_observers.get_mut(&source_key) {
            observers.retain(|g| *g != gid);
            if observers.is_empty() {
                self.source_observers.remove(&source_key);
            }
        }
        self.refresh_priority_bounds(group.desc.target_path);
        self.refresh_obligatory(group.desc.target_path);
        debug!(group = gid.0, description = %group.desc.description, "destroyed group");
        Ok(())
    }

    fn refresh_priority_bounds(&mut self, path: PathId) {
        let gids: Vec<GroupId> = self
            .by_target_path
            .get(&path)
            .map(|t| t.groups.clone())
            .unwrap_or_default();
        let prios: Vec<i32> = gids
            .iter()
            .filter_map(|g| self.groups.get(g))
            .map(|g| g.desc.priority)
            .collect();
        if let Some(table) = self.by_target_path.get_mut(&path) {
            table.min_priority = prios.iter().copied().min().unwrap_or(0);
            table.max_priority = prios.iter().copied().max().unwrap_or(0);
        }
    }

    /// Recompute `obligatory_data_elements` for every group at `path`:
    /// set iff ≥2 sibling groups share (prefix group, priority).
    fn refresh_obligatory(&mut self, path: PathId) {
        let gids: Vec<GroupId> = self
            .by_target_path
            .get(&path)
            .map(|t| t.groups.clone())
            .unwrap_or_default();
        let mut buckets: FxHashMap<(Option<GroupId>, i32), u32> = FxHashMap::default();
        for gid in &gids {
            if let Some(g) = self.groups.get(gid) {
                *buckets.entry((g.prefix_group, g.desc.priority)).or_insert(0) += 1;
            }
        }
        for gid in &gids {
            if let Some(g) = self.groups.get_mut(gid) {
                let n = buckets
                    .get(&(g.prefix_group, g.desc.priority))
                    .copied()
                    .unwrap_or(0);
                g.obligatory_data_elements = n >= 2;
            }
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn group(&self, gid: GroupId) -> Result<&MergeGroup> {
        self.groups
            .get(&gid)
            .ok_or(EngineError::UnknownGroup(gid.0))
    }

    pub fn group_by_description(&self, description: &str) -> Option<GroupId> {
        self.by_description.get(description).copied()
    }

    /// Target node currently occupied by a group's merged id.
    pub fn merged_target(&self, gid: GroupId, merged: ElementId) -> Option<NodeKey> {
        self.merged_targets.get(&(gid, merged)).copied()
    }

    /// (min, max) priority over the groups merging into `path`.
    pub fn priority_bounds(&self, path: PathId) -> Option<(i32, i32)> {
        self.by_target_path
            .get(&path)
            .map(|t| (t.min_priority, t.max_priority))
    }

    /// Maximal groups observing element changes at a source path. Delta
    /// producers feed each of these through `add_source_elements` /
    /// `remove_source_elements`.
    pub fn observers_of(&self, indexer: IndexerId, path: PathId) -> &[GroupId] {
        self.source_observers
            .get(&(indexer, path))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // ── Incremental propagation ───────────────────────────────────────

    /// Propagate added source elements from a maximal group down its chain
    /// and apply the surviving merges to the target tree.
    ///
    /// `ids` is gap-preserving: an empty slot means "handled by a sibling
    /// contributor within this same call".
    pub fn add_source_elements(
        &mut self,
        sched: &mut UpdateScheduler,
        head: GroupId,
        ids: &[Slot],
    ) -> Result<MergeOutcome> {
        let chain = self.chain_of(head)?;
        debug_assert!(
            self.groups.get(&head).is_some_and(|g| g.desc.is_maximal),
            "propagation must start at the maximal group"
        );
        let mut levels: Vec<LevelOutcome> = Vec::with_capacity(chain.len());
        let mut carry: Vec<Slot> = ids.to_vec();
        let mut from_path: Option<PathId> = None;
        for gid in &chain {
            let group = self
                .groups
                .get_mut(gid)
                .ok_or(EngineError::UnknownGroup(gid.0))?;
            let src = self
                .sources
                .get(&group.desc.source_indexer)
                .ok_or(EngineError::UnknownIndexer(group.desc.source_indexer.0))?;
            let out = group.absorb_added(src, &carry, from_path, ids, head, &mut self.alloc);
            from_path = Some(group.desc.source_path);
            carry = out.carry.clone();
            levels.push(out);
        }
        let tail = self.make_tail(&chain, &levels)?;

        // Apply minimal-first so dominating parents exist before children.
        for k in (0..chain.len()).rev() {
            let merged = levels[k].merged.clone();
            let carries = levels[k].carry.clone();
            for (i, slot) in merged.iter().enumerate() {
                let Some(m) = *slot else { continue };
                let tail_parent = if k + 1 == chain.len() {
                    match &tail {
                        MergeTail::ParentIds(p) => p.get(i).copied(),
                        MergeTail::NewlyMerged(_) => None,
                    }
                } else {
                    None
                };
                let carry_elem = carries.get(i).copied().flatten();
                self.attach_node(sched, chain[k], m, carry_elem, tail_parent)?;
            }
        }

        let rows = chain
            .iter()
            .zip(&levels)
            .map(|(g, l)| GroupSlots {
                group: *g,
                ids: l.merged.clone(),
            })
            .collect();
        Ok(MergeOutcome { rows, tail })
    }

    /// Exact mirror of `add_source_elements`: decrements propagate, a
    /// transition to zero un-merges, children are removed before parents.
    pub fn remove_source_elements(
        &mut self,
        sched: &mut UpdateScheduler,
        head: GroupId,
        ids: &[Slot],
    ) -> Result<MergeOutcome> {
        let chain = self.chain_of(head)?;
        debug_assert!(
            self.groups.get(&head).is_some_and(|g| g.desc.is_maximal),
            "propagation must start at the maximal group"
        );
        let mut levels: Vec<LevelOutcome> = Vec::with_capacity(chain.len());
        let mut carry: Vec<Slot> = ids.to_vec();
        let mut from_path: Option<PathId> = None;
        for gid in &chain {
            let group = self
                .groups
                .get_mut(gid)
                .ok_or(EngineError::UnknownGroup(gid.0))?;
            let src = self
                .sources
                .get(&group.desc.source_indexer)
                .ok_or(EngineError::UnknownIndexer(group.desc.source_indexer.0))?;
            let out = group.absorb_removed(src, &carry, from_path, ids, head);
            from_path = Some(group.desc.source_path);
            carry = out.carry.clone();
            levels.push(out);
        }
        let tail = self.make_tail(&chain, &levels)?;

        // Remove maximal-first: deepest target nodes go before the nodes
        // that dominate them.
        for (k, gid) in chain.iter().enumerate() {
            let merged = levels[k].merged.clone();
            for slot in merged {
                let Some(m) = slot else { continue };
                self.detach_node(sched, *gid, m)?;
            }
        }

        let rows = chain
            .iter()
            .zip(&levels)
            .map(|(g, l)| GroupSlots {
                group: *g,
                ids: l.merged.clone(),
            })
            .collect();
        Ok(MergeOutcome { rows, tail })
    }

    /// Record new identity assignments and schedule the affected identity
    /// groups. The actual node deltas run from the identity queue, before
    /// any path-node epilogue.
    pub fn update_identity(
        &mut self,
        sched: &mut UpdateScheduler,
        indexer: IndexerId,
        identification: IdentificationId,
        updates: &[(ElementId, Identity)],
    ) -> Result<()> {
        let src = self
            .sources
            .get_mut(&indexer)
            .ok_or(EngineError::UnknownIndexer(indexer.0))?;
        for (element, identity) in updates {
            src.set_identity(identification, *element, identity.clone());
        }
        let gids: Vec<GroupId> = self
            .groups
            .values()
            .filter(|g| {
                g.desc.is_identity
                    && g.desc.source_indexer == indexer
                    && g.desc.source_identification == Some(identification)
            })
            .map(|g| g.id)
            .collect();
        let ids: Vec<ElementId> = updates.iter().map(|(e, _)| *e).collect();
        let identities: Vec<Identity> = updates.iter().map(|(_, i)| i.clone()).collect();
        for gid in gids {
            if let Some(group) = self.groups.get_mut(&gid) {
                group.buffer_identity_updates(&ids, &identities);
                if !group.identity_update_scheduled {
                    group.identity_update_scheduled = true;
                    sched.schedule_identity_update(gid);
                }
            }
        }
        Ok(())
    }

    // ── Scheduling surface for collaborators ──────────────────────────

    pub fn register_order_service(&mut self, id: OrderServiceId, watched: &[PathId]) {
        self.order_services.insert(id, OrderServiceState::default());
        for path in watched {
            self.watchers.entry(*path).or_default().push(id);
        }
    }

    pub fn unregister_order_service(&mut self, id: OrderServiceId) {
        self.order_services.remove(&id);
        for list in self.watchers.values_mut() {
            list.retain(|w| *w != id);
        }
        self.watchers.retain(|_, list| !list.is_empty());
    }

    pub fn request_comparison_cleanup(&mut self, sched: &mut UpdateScheduler, id: ComparisonId) {
        let flag = self.comparisons.entry(id).or_insert(false);
        if !*flag {
            *flag = true;
            sched.schedule_comp_cleanup(id);
        }
    }

    pub fn schedule_completion(&mut self, sched: &mut UpdateScheduler, id: CompletionTaskId) {
        let flag = self.completions.entry(id).or_insert(false);
        if !*flag {
            *flag = true;
            sched.schedule_complete_incremental_update(id);
        }
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Prefix chain of `head`, maximal first, minimal last.
    fn chain_of(&self, head: GroupId) -> Result<Vec<GroupId>> {
        let mut chain = vec![head];
        let mut cur = head;
        loop {
            let group = self
                .groups
                .get(&cur)
                .ok_or(EngineError::UnknownGroup(cur.0))?;
            match group.prefix_group {
                Some(p) => {
                    chain.push(p);
                    cur = p;
                }
                None => break,
            }
        }
        Ok(chain)
    }

    fn make_tail(&self, chain: &[GroupId], levels: &[LevelOutcome]) -> Result<MergeTail> {
        let Some((&minimal_id, minimal_level)) = chain.last().zip(levels.last()) else {
            return Ok(MergeTail::NewlyMerged(Vec::new()));
        };
        let minimal = self
            .groups
            .get(&minimal_id)
            .ok_or(EngineError::UnknownGroup(minimal_id.0))?;
        if minimal.desc.target_path.is_root() {
            Ok(MergeTail::NewlyMerged(
                minimal_level.carry.iter().map(Slot::is_some).collect(),
            ))
        } else {
            let src = self
                .sources
                .get(&minimal.desc.source_indexer)
                .ok_or(EngineError::UnknownIndexer(minimal.desc.source_indexer.0))?;
            Ok(MergeTail::ParentIds(
                minimal.add_source_parents(src, &minimal_level.carry),
            ))
        }
    }

    fn resolve_dominating(
        &self,
        gid: GroupId,
        carry_elem: Option<ElementId>,
        tail_parent: Option<Slot>,
    ) -> Dominating {
        let Some(group) = self.groups.get(&gid) else {
            return Dominating::Node(NodeKey::root());
        };
        let Some(pid) = group.prefix_group else {
            // Minimal group: the tail parent id (or the source parent read
            // directly) names the dominating node at the target's parent
            // path; root element means "directly under the root".
            let tp = group.desc.target_path;
            if tp.is_root() {
                return Dominating::Node(NodeKey::root());
            }
            let parent = tail_parent
                .flatten()
                .or_else(|| {
                    let src = self.sources.get(&group.desc.source_indexer)?;
                    let c = carry_elem?;
                    src.parent_of(NodeKey::new(group.desc.source_path, c))
                        .map(|p| p.element)
                })
                .unwrap_or(ElementId::ROOT);
            if parent == ElementId::ROOT {
                return Dominating::Node(NodeKey::root());
            }
            let parent_path = self.target.path_parent(tp).unwrap_or(PathId::ROOT);
            let key = NodeKey::new(parent_path, parent);
            if self.target.contains_node(key) {
                return Dominating::Node(key);
            }
            warn!(
                group = gid.0,
                parent = parent.0,
                "dominating node missing at target parent path; attaching at root"
            );
            return Dominating::Node(NodeKey::root());
        };

        // Non-minimal: the dominating node is whatever the prefix group
        // merged for this element's ancestor at the prefix source path.
        let (Some(prefix), Some(src), Some(c)) = (
            self.groups.get(&pid),
            self.sources.get(&group.desc.source_indexer),
            carry_elem,
        ) else {
            return Dominating::Node(NodeKey::root());
        };
        let Some(pc) = src.element_at(
            NodeKey::new(group.desc.source_path, c),
            prefix.desc.source_path,
        ) else {
            debug_assert!(false, "element {} has no prefix-path ancestor", c.0);
            return Dominating::Node(NodeKey::root());
        };
        if prefix.desc.is_identity {
            let node = prefix
                .identity_nodes
                .identity_of_source(pc)
                .and_then(|i| prefix.identity_nodes.node_for(i));
            match node {
                Some(pm) => match self.merged_targets.get(&(pid, pm)) {
                    Some(key) => Dominating::Node(*key),
                    None => Dominating::Pending(
                        pid,
                        prefix
                            .identity_nodes
                            .identity_of_node(pm)
                            .cloned()
                            .unwrap_or_else(|| prefix.source_identity(src, pc)),
                    ),
                },
                // Parent not merged yet at all: wait for its identity.
                None => Dominating::Pending(pid, prefix.source_identity(src, pc)),
            }
        } else {
            match self.merged_targets.get(&(pid, pc)) {
                Some(key) => Dominating::Node(*key),
                None => {
                    warn!(
                        group = gid.0,
                        prefix = pid.0,
                        ancestor = pc.0,
                        "prefix group has no merged node for ancestor; attaching at root"
                    );
                    Dominating::Node(NodeKey::root())
                }
            }
        }
    }

    /// Merge one id into the target tree, or park it in the prefix group's
    /// pending-attachment table when its dominating identity node is not
    /// there yet.
    fn attach_node(
        &mut self,
        sched: &mut UpdateScheduler,
        gid: GroupId,
        m: ElementId,
        carry_elem: Option<ElementId>,
        tail_parent: Option<Slot>,
    ) -> Result<()> {
        let dominating = match self.resolve_dominating(gid, carry_elem, tail_parent) {
            Dominating::Node(key) => key,
            Dominating::Pending(pid, identity) => {
                let tp = self
                    .groups
                    .get(&gid)
                    .map(|g| g.desc.target_path)
                    .unwrap_or(PathId::ROOT);
                trace!(
                    group = gid.0,
                    element = m.0,
                    "parking child until its parent identity node arrives"
                );
                if let Some(prefix) = self.groups.get_mut(&pid) {
                    prefix.identity_nodes.queue_child(
                        identity,
                        PendingChild {
                            group: gid,
                            element: m,
                            path: tp,
                        },
                    );
                }
                return Ok(());
            }
        };
        self.place_node(sched, gid, m, carry_elem, dominating)
    }

    fn place_node(
        &mut self,
        sched: &mut UpdateScheduler,
        gid: GroupId,
        m: ElementId,
        carry_elem: Option<ElementId>,
        dominating: NodeKey,
    ) -> Result<()> {
        let (tp, t, identity, value) = {
            let group = self
                .groups
                .get_mut(&gid)
                .ok_or(EngineError::UnknownGroup(gid.0))?;
            let tp = group.desc.target_path;
            let collides = self.target.contains_node(NodeKey::new(tp, m));
            let t = if group.obligatory_data_elements || collides {
                group
                    .target_ids
                    .translate(m, tp, dominating.element, &mut self.alloc)
            } else {
                m
            };
            let identity = if group.desc.is_identity {
                group.identity_nodes.identity_of_node(m).cloned()
            } else {
                None
            };
            let value = match (group.desc.is_identity, carry_elem) {
                (false, Some(c)) => match self.sources.get(&group.desc.source_indexer) {
                    Some(src) => group.source_value(src, c),
                    None => None,
                },
                _ => None,
            };
            (tp, t, identity, value)
        };

        let key = NodeKey::new(tp, t);
        self.target.add_node(key, NodeKind::Data, Some(dominating))?;
        if let Some(value) = value {
            self.target.set_value(key, value)?;
        }
        self.merged_targets.insert((gid, m), key);
        if self.config.trace_merges {
            debug!(
                group = gid.0,
                merged = m.0,
                target = t.0,
                path = tp.0,
                "merged node placed"
            );
        }
        self.log_change(sched, tp, NodeChange::Added(t));

        // Children parked on this identity can attach now; their own
        // identities may in turn release grandchildren.
        if let Some(identity) = identity {
            let mut work = vec![(gid, identity, key)];
            while let Some((owner, ident, parent_key)) = work.pop() {
                let children = match self.groups.get_mut(&owner) {
                    Some(g) => g.identity_nodes.take_children(&ident),
                    None => continue,
                };
                for child in children {
                    let (ct, child_identity) = {
                        let Some(cg) = self.groups.get_mut(&child.group) else {
                            continue;
                        };
                        let collides = self
                            .target
                            .contains_node(NodeKey::new(child.path, child.element));
                        let ct = if cg.obligatory_data_elements || collides {
                            cg.target_ids.translate(
                                child.element,
                                child.path,
                                parent_key.element,
                                &mut self.alloc,
                            )
                        } else {
                            child.element
                        };
                        let ci = if cg.desc.is_identity {
                            cg.identity_nodes.identity_of_node(child.element).cloned()
                        } else {
                            None
                        };
                        (ct, ci)
                    };
                    let ck = NodeKey::new(child.path, ct);
                    self.target.add_node(ck, NodeKind::Data, Some(parent_key))?;
                    self.merged_targets.insert((child.group, child.element), ck);
                    self.log_change(sched, child.path, NodeChange::Added(ct));
                    if let Some(ci) = child_identity {
                        work.push((child.group, ci, ck));
                    }
                }
            }
        }
        Ok(())
    }

    /// Un-merge one id: remove its target node (and any dominated subtree),
    /// or cancel its pending attachment if it never got placed.
    fn detach_node(&mut self, sched: &mut UpdateScheduler, gid: GroupId, m: ElementId) -> Result<()> {
        let Some(key) = self.merged_targets.remove(&(gid, m)) else {
            if let Some(pid) = self.groups.get(&gid).and_then(|g| g.prefix_group) {
                if let Some(prefix) = self.groups.get_mut(&pid) {
                    prefix.identity_nodes.cancel_child_element(m);
                }
            }
            return Ok(());
        };
        let parent = self.target.parent_of(key);
        let removed = self.target.remove_node(key)?;
        let removed_set: FxHashSet<NodeKey> = removed.iter().copied().collect();
        let mut orphaned: Vec<(GroupId, ElementId)> = Vec::new();
        self.merged_targets.retain(|k, v| {
            if removed_set.contains(v) {
                orphaned.push(*k);
                false
            } else {
                true
            }
        });
        // Dominated nodes that are still merged in their own groups lost
        // their parent with the subtree; park them on the parent's current
        // identity so a re-added parent re-attaches them.
        for (cgid, cm) in orphaned {
            if cgid == gid && cm == m {
                continue;
            }
            self.requeue_child(cgid, cm);
        }
        if let Some(group) = self.groups.get_mut(&gid) {
            if let Some(parent) = parent {
                group.target_ids.release(m, key.path, parent.element);
            }
        }
        if self.config.trace_merges {
            debug!(
                group = gid.0,
                merged = m.0,
                removed = removed.len(),
                "merged node removed"
            );
        }
        for rk in removed {
            self.log_change(sched, rk.path, NodeChange::Removed(rk.element));
            self.released
                .entry(self.target_indexer)
                .or_default()
                .push(rk.element);
        }
        self.request_data_cleanup(sched, self.target_indexer);
        Ok(())
    }

    /// Park a still-merged child whose parent node just disappeared. Only
    /// identity prefixes support retroactive re-attachment; for plain
    /// prefixes the parent's return re-merges the subtree upstream.
    fn requeue_child(&mut self, gid: GroupId, m: ElementId) {
        let pending = {
            let Some(group) = self.groups.get(&gid) else {
                return;
            };
            let Some(pid) = group.prefix_group else {
                return;
            };
            let Some(prefix) = self.groups.get(&pid) else {
                return;
            };
            if !prefix.desc.is_identity {
                return;
            }
            let Some(src) = self.sources.get(&group.desc.source_indexer) else {
                return;
            };
            let c = if group.desc.is_identity {
                group.identity_nodes.sources_of_node(m).first().copied()
            } else {
                Some(m)
            };
            let Some(c) = c else {
                return;
            };
            let Some(pc) = src.element_at(
                NodeKey::new(group.desc.source_path, c),
                prefix.desc.source_path,
            ) else {
                return;
            };
            let identity = prefix.source_identity(src, pc);
            (
                pid,
                identity,
                PendingChild {
                    group: gid,
                    element: m,
                    path: group.desc.target_path,
                },
            )
        };
        let (pid, identity, child) = pending;
        if let Some(prefix) = self.groups.get_mut(&pid) {
            prefix.identity_nodes.queue_child(identity, child);
        }
    }

    fn log_change(&mut self, sched: &mut UpdateScheduler, path: PathId, change: NodeChange) {
        let key = PathNodeKey::new(self.target_indexer, path);
        let state = self.path_nodes.entry(key).or_default();
        state.changes.push(change);
        if !state.scheduled {
            state.scheduled = true;
            let depth = self.target.path_depth(path);
            sched.schedule_path_node(key, depth);
        }
    }

    fn request_data_cleanup(&mut self, sched: &mut UpdateScheduler, indexer: IndexerId) {
        let flag = self.cleanup_scheduled.entry(indexer).or_insert(false);
        if !*flag {
            *flag = true;
            sched.schedule_data_elements(indexer);
        }
    }
}

impl<H: RuntimeHooks> ScheduleHost for MergeRuntime<H> {
    fn take_identity_scheduled(&mut self, group: GroupId) -> bool {
        match self.groups.get_mut(&group) {
            Some(g) if g.identity_update_scheduled => {
                g.identity_update_scheduled = false;
                true
            }
            _ => false,
        }
    }

    fn run_identity_update(&mut self, sched: &mut UpdateScheduler, gid: GroupId) {
        let delta = {
            let Some(group) = self.groups.get_mut(&gid) else {
                return;
            };
            let updates = group.take_pending_identity_updates();
            group.update_identity(&updates, &mut self.alloc)
        };
        trace!(
            group = gid.0,
            added = delta.added.len(),
            removed = delta.removed.len(),
            "identity update applied"
        );
        for node in delta.removed {
            if let Err(err) = self.detach_node(sched, gid, node) {
                warn!(group = gid.0, node = node.0, %err, "identity removal failed");
            }
        }
        for node in delta.added {
            let carry = self
                .groups
                .get(&gid)
                .map(|g| g.identity_nodes.sources_of_node(node))
                .and_then(|sources| sources.first().copied());
            if let Err(err) = self.attach_node(sched, gid, node, carry, None) {
                warn!(group = gid.0, node = node.0, %err, "identity merge failed");
            }
        }
    }

    fn take_path_node_scheduled(&mut self, key: PathNodeKey) -> bool {
        match self.path_nodes.get_mut(&key) {
            Some(state) if state.scheduled => {
                state.scheduled = false;
                true
            }
            _ => false,
        }
    }

    fn run_path_node_epilogue(&mut self, sched: &mut UpdateScheduler, key: PathNodeKey) {
        let changes = match self.path_nodes.get_mut(&key) {
            Some(state) => std::mem::take(&mut state.changes),
            None => {
                warn!(path = key.path.0, "epilogue for unknown path node");
                return;
            }
        };
        trace!(
            path = key.path.0,
            changes = changes.len(),
            "path node epilogue"
        );
        let watchers = self.watchers.get(&key.path).cloned().unwrap_or_default();
        for id in watchers {
            if let Some(svc) = self.order_services.get_mut(&id) {
                if !svc.scheduled {
                    svc.scheduled = true;
                    sched.schedule_order_service(id);
                }
            }
        }
        self.hooks.path_node_settled(key);
    }

    fn take_comparison_scheduled(&mut self, id: ComparisonId) -> bool {
        match self.comparisons.get_mut(&id) {
            Some(flag) if *flag => {
                *flag = false;
                true
            }
            _ => false,
        }
    }

    fn run_comparison_cleanup(&mut self, _sched: &mut UpdateScheduler, id: ComparisonId) {
        self.comparisons.remove(&id);
        self.hooks.cleanup_comparison(id);
    }

    fn take_order_service_scheduled(&mut self, id: OrderServiceId) -> bool {
        match self.order_services.get_mut(&id) {
            Some(svc) if svc.scheduled => {
                svc.scheduled = false;
                true
            }
            _ => false,
        }
    }

    fn run_order_service_refresh(&mut self, _sched: &mut UpdateScheduler, id: OrderServiceId) {
        self.hooks.refresh_order_service(id);
    }

    fn take_completion_scheduled(&mut self, id: CompletionTaskId) -> bool {
        match self.completions.get_mut(&id) {
            Some(flag) if *flag => {
                *flag = false;
                true
            }
            _ => false,
        }
    }

    fn run_completion_task(&mut self, _sched: &mut UpdateScheduler, id: CompletionTaskId) {
        self.completions.remove(&id);
        self.hooks.complete_cycle(id);
    }

    fn take_data_cleanup_scheduled(&mut self, indexer: IndexerId) -> bool {
        match self.cleanup_scheduled.get_mut(&indexer) {
            Some(flag) if *flag => {
                *flag = false;
                true
            }
            _ => false,
        }
    }

    fn run_data_element_cleanup(&mut self, _sched: &mut UpdateScheduler, indexer: IndexerId) {
        let drained = self
            .released
            .get_mut(&indexer)
            .map(std::mem::take)
            .unwrap_or_default();
        trace!(
            indexer = indexer.0,
            elements = drained.len(),
            "data element cleanup"
        );
        let tree = if indexer == self.target_indexer {
            Some(&mut self.target)
        } else {
            self.sources.get_mut(&indexer)
        };
        if let Some(tree) = tree {
            for element in drained {
                tree.remove_identities_of(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ids::IndexerId;
    use pretty_assertions::assert_eq;

    const SRC: IndexerId = IndexerId(1);
    const TGT: IndexerId = IndexerId(0);

    fn runtime() -> MergeRuntime {
        MergeRuntime::new(EngineConfig::default(), TGT).expect("valid default config")
    }

    fn descriptor(
        source_path: PathId,
        target_path: PathId,
        maximal: bool,
        description: &str,
    ) -> GroupDescriptor {
        GroupDescriptor {
            source_indexer: SRC,
            source_path,
            target_path,
            priority: 1,
            is_maximal: maximal,
            is_identity: false,
            source_identification: None,
            target_identification: None,
            description: description.to_string(),
        }
    }

    #[test]
    fn test_register_group_deduplicates_by_description() {
        let mut rt = runtime();
        let a = rt.register_source(SRC).alloc_path(PathId::ROOT, "a").unwrap();
        let desc = descriptor(a, PathId::ROOT, true, "g:a");

        let g1 = rt.register_group(desc.clone(), None).unwrap();
        let g2 = rt.register_group(desc.clone(), None).unwrap();
        assert_eq!(g1, g2);

        // Same description with different shape conflicts.
        let mut other = desc;
        other.priority = 9;
        assert!(matches!(
            rt.register_group(other, None),
            Err(EngineError::ConflictingGroup(_))
        ));
    }

    #[test]
    fn test_unknown_source_indexer_rejected() {
        let mut rt = runtime();
        let desc = descriptor(PathId::ROOT, PathId::ROOT, true, "g:x");
        assert!(matches!(
            rt.register_group(desc, None),
            Err(EngineError::UnknownIndexer(_))
        ));
    }

    #[test]
    fn test_group_destroyed_when_mappings_empty() {
        let mut rt = runtime();
        let a = rt.register_source(SRC).alloc_path(PathId::ROOT, "a").unwrap();
        let gid = rt
            .register_group(descriptor(a, PathId::ROOT, true, "g:a"), None)
            .unwrap();

        rt.add_mapping(gid, MappingKey::new(1, 1)).unwrap();
        rt.add_mapping(gid, MappingKey::new(1, 2)).unwrap();
        assert!(!rt.remove_mapping(gid, MappingKey::new(1, 1)).unwrap());
        assert!(rt.remove_mapping(gid, MappingKey::new(1, 2)).unwrap());
        assert!(rt.group(gid).is_err());
        assert_eq!(rt.group_by_description("g:a"), None);
    }

    #[test]
    fn test_obligatory_data_elements_tracks_sibling_ties() {
        let mut rt = runtime();
        let src = rt.register_source(SRC);
        let a = src.alloc_path(PathId::ROOT, "a").unwrap();
        let b = src.alloc_path(PathId::ROOT, "b").unwrap();

        let g1 = rt
            .register_group(descriptor(a, PathId::ROOT, true, "g:a"), None)
            .unwrap();
        assert!(!rt.group(g1).unwrap().obligatory_data_elements);

        // Second sibling with equal (prefix, priority) and target path.
        let g2 = rt
            .register_group(descriptor(b, PathId::ROOT, true, "g:b"), None)
            .unwrap();
        assert!(rt.group(g1).unwrap().obligatory_data_elements);
        assert!(rt.group(g2).unwrap().obligatory_data_elements);

        rt.add_mapping(g2, MappingKey::new(2, 1)).unwrap();
        rt.remove_mapping(g2, MappingKey::new(2, 1)).unwrap();
        assert!(!rt.group(g1).unwrap().obligatory_data_elements);
    }

    #[test]
    fn test_maximal_groups_observe_their_source_path() {
        let mut rt = runtime();
        let src = rt.register_source(SRC);
        let a = src.alloc_path(PathId::ROOT, "a").unwrap();
        let b = src.alloc_path(PathId::ROOT, "b").unwrap();

        let g1 = rt
            .register_group(descriptor(a, PathId::ROOT, true, "g:a"), None)
            .unwrap();
        assert_eq!(rt.observers_of(SRC, a), &[g1]);
        assert_eq!(rt.observers_of(SRC, b), &[] as &[GroupId]);

        // Non-maximal groups are fed through the chain, not observed.
        let _g2 = rt
            .register_group(descriptor(b, PathId::ROOT, false, "g:b"), None)
            .unwrap();
        assert_eq!(rt.observers_of(SRC, b), &[] as &[GroupId]);

        // Identity groups are driven by the identity-update queue.
        let mut ident = descriptor(a, PathId::ROOT, true, "ig:a");
        ident.is_identity = true;
        ident.source_identification = Some(IdentificationId(1));
        let _g3 = rt.register_group(ident, None).unwrap();
        assert_eq!(rt.observers_of(SRC, a), &[g1]);

        // Destruction reverses the registration.
        rt.add_mapping(g1, MappingKey::new(1, 1)).unwrap();
        rt.remove_mapping(g1, MappingKey::new(1, 1)).unwrap();
        assert_eq!(rt.observers_of(SRC, a), &[] as &[GroupId]);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "propagation must start at the maximal group")]
    fn test_remove_from_non_maximal_head_is_rejected() {
        let mut rt = runtime();
        let mut sched = rt.make_scheduler();
        let a = rt.register_source(SRC).alloc_path(PathId::ROOT, "a").unwrap();
        let gid = rt
            .register_group(descriptor(a, PathId::ROOT, false, "g:a"), None)
            .unwrap();
        let _ = rt.remove_source_elements(&mut sched, gid, &[Some(ElementId(1))]);
    }

    #[test]
    fn test_priority_bounds() {
        let mut rt = runtime();
        let src = rt.register_source(SRC);
        let a = src.alloc_path(PathId::ROOT, "a").unwrap();
        let b = src.alloc_path(PathId::ROOT, "b").unwrap();

        let mut d1 = descriptor(a, PathId::ROOT, true, "g:a");
        d1.priority = -2;
        let mut d2 = descriptor(b, PathId::ROOT, true, "g:b");
        d2.priority = 5;
        rt.register_group(d1, None).unwrap();
        rt.register_group(d2, None).unwrap();

        assert_eq!(rt.priority_bounds(PathId::ROOT), Some((-2, 5)));
    }

    #[test]
    fn test_add_then_remove_round_trips_target_tree() {
        let mut rt = runtime();
        let mut sched = rt.make_scheduler();
        let src = rt.register_source(SRC);
        let a = src.alloc_path(PathId::ROOT, "a").unwrap();
        src.add_node(NodeKey::new(a, ElementId(1)), NodeKind::Data, Some(NodeKey::root()))
            .unwrap();
        src.set_value(NodeKey::new(a, ElementId(1)), pathmerge_store::SimpleValue::Int(7))
            .unwrap();

        let ta = rt.target_mut().alloc_path(PathId::ROOT, "out").unwrap();
        let gid = rt
            .register_group(descriptor(a, ta, true, "g:a"), None)
            .unwrap();

        let outcome = rt
            .add_source_elements(&mut sched, gid, &[Some(ElementId(1))])
            .unwrap();
        assert!(!outcome.is_silent());
        let key = rt.merged_target(gid, ElementId(1)).expect("merged");
        assert_eq!(key, NodeKey::new(ta, ElementId(1)));
        assert_eq!(
            rt.target().value(key),
            Some(&pathmerge_store::SimpleValue::Int(7))
        );

        let outcome = rt
            .remove_source_elements(&mut sched, gid, &[Some(ElementId(1))])
            .unwrap();
        assert!(!outcome.is_silent());
        assert_eq!(rt.merged_target(gid, ElementId(1)), None);
        assert!(!rt.target().contains_node(key));
    }
}
