//! In-memory Path Index
//!
//! Hierarchical node store addressed by `(PathId, ElementId)`. Paths are
//! interned attribute chains with explicit reference counts; element ids are
//! allocated monotonically and never reused within one store.

use crate::domain::{
    ElementId, Identity, IdentificationId, NodeKey, NodeKind, NodeRecord, PathId, SimpleValue,
};
use crate::error::{Result, StoreError};
use rustc_hash::FxHashMap;
use tracing::trace;

/// One interned path.
#[derive(Debug, Clone)]
struct PathEntry {
    parent: PathId,
    attr: String,
    depth: u32,
    refs: u32,
}

/// The hierarchical, path-addressed node store.
///
/// All mutation goes through the narrow API below; the merge engine never
/// touches the tables directly.
#[derive(Debug)]
pub struct PathIndex {
    paths: Vec<PathEntry>,
    path_lookup: FxHashMap<(PathId, String), PathId>,
    nodes: FxHashMap<NodeKey, NodeRecord>,
    identities: FxHashMap<(IdentificationId, ElementId), Identity>,
    next_element: u32,
}

impl Default for PathIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PathIndex {
    pub fn new() -> Self {
        let mut index = PathIndex {
            paths: Vec::new(),
            path_lookup: FxHashMap::default(),
            nodes: FxHashMap::default(),
            identities: FxHashMap::default(),
            next_element: 1,
        };
        // Root path is always present and pinned.
        index.paths.push(PathEntry {
            parent: PathId::ROOT,
            attr: String::new(),
            depth: 0,
            refs: 1,
        });
        // Root element exists from the start.
        index
            .nodes
            .insert(NodeKey::root(), NodeRecord::new(NodeKey::root(), NodeKind::Data, None));
        index
    }

    // ── Path interning ────────────────────────────────────────────────

    /// Intern (or re-reference) the path `parent.attr`.
    pub fn alloc_path(&mut self, parent: PathId, attr: &str) -> Result<PathId> {
        if parent.0 as usize >= self.paths.len() {
            return Err(StoreError::UnknownPath(parent.0));
        }
        if let Some(&existing) = self.path_lookup.get(&(parent, attr.to_string())) {
            self.paths[existing.0 as usize].refs += 1;
            return Ok(existing);
        }
        let id = PathId(self.paths.len() as u32);
        let depth = self.paths[parent.0 as usize].depth + 1;
        self.paths.push(PathEntry {
            parent,
            attr: attr.to_string(),
            depth,
            refs: 1,
        });
        self.path_lookup.insert((parent, attr.to_string()), id);
        trace!(path = id.0, depth, attr, "allocated path");
        Ok(id)
    }

    /// Drop one reference to a path. The id stays valid for lookup so that
    /// late releases of bookkeeping keyed by it remain well-defined.
    pub fn release_path(&mut self, path: PathId) -> Result<()> {
        if path.is_root() {
            return Ok(());
        }
        let entry = self
            .paths
            .get_mut(path.0 as usize)
            .ok_or(StoreError::UnknownPath(path.0))?;
        if entry.refs == 0 {
            return Err(StoreError::UnreferencedPath(path.0));
        }
        entry.refs -= 1;
        Ok(())
    }

    pub fn path_parent(&self, path: PathId) -> Option<PathId> {
        if path.is_root() {
            return None;
        }
        self.paths.get(path.0 as usize).map(|e| e.parent)
    }

    pub fn path_depth(&self, path: PathId) -> u32 {
        self.paths.get(path.0 as usize).map(|e| e.depth).unwrap_or(0)
    }

    pub fn path_attr(&self, path: PathId) -> Option<&str> {
        self.paths.get(path.0 as usize).map(|e| e.attr.as_str())
    }

    /// Dotted rendering for logs and tests, e.g. `"a.b"`.
    pub fn path_string(&self, path: PathId) -> String {
        let mut parts = Vec::new();
        let mut cur = path;
        while !cur.is_root() {
            match self.paths.get(cur.0 as usize) {
                Some(entry) => {
                    parts.push(entry.attr.clone());
                    cur = entry.parent;
                }
                None => break,
            }
        }
        parts.reverse();
        parts.join(".")
    }

    // ── Element allocation ────────────────────────────────────────────

    /// Allocate a fresh element id, unique within this indexer.
    pub fn reserve_element(&mut self) -> ElementId {
        let id = ElementId(self.next_element);
        self.next_element += 1;
        id
    }

    /// Claim a specific element id from the allocator, so externally chosen
    /// ids and reserved ids never collide.
    pub fn claim_element(&mut self, element: ElementId) {
        if element.0 >= self.next_element {
            self.next_element = element.0 + 1;
        }
    }

    // ── Node operations ───────────────────────────────────────────────

    pub fn add_node(&mut self, key: NodeKey, kind: NodeKind, parent: Option<NodeKey>) -> Result<()> {
        if key.path.0 as usize >= self.paths.len() {
            return Err(StoreError::UnknownPath(key.path.0));
        }
        if self.nodes.contains_key(&key) {
            return Err(StoreError::DuplicateNode {
                path: key.path.0,
                element: key.element.0,
            });
        }
        if let Some(parent_key) = parent {
            let parent_node = self
                .nodes
                .get_mut(&parent_key)
                .ok_or(StoreError::MissingParent {
                    path: parent_key.path.0,
                    element: parent_key.element.0,
                })?;
            parent_node.children.push(key);
        }
        self.claim_element(key.element);
        self.nodes.insert(key, NodeRecord::new(key, kind, parent));
        trace!(
            path = key.path.0,
            element = key.element.0,
            ?kind,
            "added node"
        );
        Ok(())
    }

    /// Remove a node and its whole subtree. Returns every removed key,
    /// children before parents.
    pub fn remove_node(&mut self, key: NodeKey) -> Result<Vec<NodeKey>> {
        let record = self.nodes.get(&key).ok_or(StoreError::UnknownNode {
            path: key.path.0,
            element: key.element.0,
        })?;
        // Detach from the parent first.
        if let Some(parent_key) = record.parent {
            if let Some(parent) = self.nodes.get_mut(&parent_key) {
                parent.children.retain(|c| *c != key);
            }
        }
        // Depth-first collect, then remove children-first.
        let mut stack = vec![key];
        let mut ordered = Vec::new();
        while let Some(k) = stack.pop() {
            ordered.push(k);
            if let Some(node) = self.nodes.get(&k) {
                stack.extend(node.children.iter().copied());
            }
        }
        ordered.reverse();
        for k in &ordered {
            self.nodes.remove(k);
        }
        trace!(
            path = key.path.0,
            element = key.element.0,
            removed = ordered.len(),
            "removed subtree"
        );
        Ok(ordered)
    }

    pub fn set_value(&mut self, key: NodeKey, value: SimpleValue) -> Result<()> {
        let node = self.nodes.get_mut(&key).ok_or(StoreError::UnknownNode {
            path: key.path.0,
            element: key.element.0,
        })?;
        node.value = Some(value);
        Ok(())
    }

    pub fn value(&self, key: NodeKey) -> Option<&SimpleValue> {
        self.nodes.get(&key).and_then(|n| n.value.as_ref())
    }

    pub fn node(&self, key: NodeKey) -> Option<&NodeRecord> {
        self.nodes.get(&key)
    }

    pub fn contains_node(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn parent_of(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(&key).and_then(|n| n.parent)
    }

    pub fn children_of(&self, key: NodeKey) -> &[NodeKey] {
        self.nodes
            .get(&key)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// All element ids with a node at `path`, sorted for determinism.
    pub fn elements_at(&self, path: PathId) -> Vec<ElementId> {
        let mut out: Vec<ElementId> = self
            .nodes
            .keys()
            .filter(|k| k.path == path)
            .map(|k| k.element)
            .collect();
        out.sort();
        out
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Ancestry ──────────────────────────────────────────────────────

    /// Walk from `key` up the parent chain (inclusive) to the node sitting
    /// at `path`. This is the raising primitive: the lowest ancestor of an
    /// element at a shallower path.
    pub fn element_at(&self, key: NodeKey, path: PathId) -> Option<ElementId> {
        let mut cur = key;
        loop {
            if cur.path == path {
                return Some(cur.element);
            }
            cur = self.parent_of(cur)?;
        }
    }

    // ── Identity assignment ───────────────────────────────────────────

    pub fn set_identity(&mut self, id: IdentificationId, element: ElementId, identity: Identity) {
        self.identities.insert((id, element), identity);
    }

    pub fn identity(&self, id: IdentificationId, element: ElementId) -> Option<&Identity> {
        self.identities.get(&(id, element))
    }

    pub fn clear_identity(&mut self, id: IdentificationId, element: ElementId) -> Option<Identity> {
        self.identities.remove(&(id, element))
    }

    /// Drop every identity assignment of `element`, across all
    /// identification tables. Used by the end-of-cycle data-element cleanup.
    pub fn remove_identities_of(&mut self, element: ElementId) {
        self.identities.retain(|(_, e), _| *e != element);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(path: PathId, element: u32) -> NodeKey {
        NodeKey::new(path, ElementId(element))
    }

    #[test]
    fn test_path_interning_refcounts() {
        let mut index = PathIndex::new();
        let a = index.alloc_path(PathId::ROOT, "a").unwrap();
        let a2 = index.alloc_path(PathId::ROOT, "a").unwrap();
        assert_eq!(a, a2);
        let ab = index.alloc_path(a, "b").unwrap();
        assert_eq!(index.path_depth(ab), 2);
        assert_eq!(index.path_string(ab), "a.b");

        index.release_path(a).unwrap();
        index.release_path(a).unwrap();
        assert!(matches!(
            index.release_path(a),
            Err(StoreError::UnreferencedPath(_))
        ));
    }

    #[test]
    fn test_add_remove_subtree() {
        let mut index = PathIndex::new();
        let a = index.alloc_path(PathId::ROOT, "a").unwrap();
        let ab = index.alloc_path(a, "b").unwrap();

        index
            .add_node(key(a, 1), NodeKind::Data, Some(NodeKey::root()))
            .unwrap();
        index
            .add_node(key(ab, 10), NodeKind::Data, Some(key(a, 1)))
            .unwrap();
        index
            .add_node(key(ab, 11), NodeKind::Data, Some(key(a, 1)))
            .unwrap();

        assert_eq!(index.children_of(key(a, 1)).len(), 2);

        let removed = index.remove_node(key(a, 1)).unwrap();
        assert_eq!(removed.len(), 3);
        // Children come before the parent.
        assert_eq!(*removed.last().unwrap(), key(a, 1));
        assert!(!index.contains_node(key(ab, 10)));
        assert!(index.children_of(NodeKey::root()).is_empty());
    }

    #[test]
    fn test_duplicate_and_missing_parent() {
        let mut index = PathIndex::new();
        let a = index.alloc_path(PathId::ROOT, "a").unwrap();
        index
            .add_node(key(a, 1), NodeKind::Data, Some(NodeKey::root()))
            .unwrap();
        assert!(matches!(
            index.add_node(key(a, 1), NodeKind::Data, None),
            Err(StoreError::DuplicateNode { .. })
        ));
        assert!(matches!(
            index.add_node(key(a, 2), NodeKind::Data, Some(key(a, 9))),
            Err(StoreError::MissingParent { .. })
        ));
    }

    #[test]
    fn test_element_at_raises_to_ancestor() {
        let mut index = PathIndex::new();
        let a = index.alloc_path(PathId::ROOT, "a").unwrap();
        let ab = index.alloc_path(a, "b").unwrap();
        let abc = index.alloc_path(ab, "c").unwrap();

        index
            .add_node(key(a, 1), NodeKind::Data, Some(NodeKey::root()))
            .unwrap();
        // Attribute node shares the element id with its data parent.
        index
            .add_node(key(ab, 1), NodeKind::Attribute, Some(key(a, 1)))
            .unwrap();
        index
            .add_node(key(abc, 30), NodeKind::Data, Some(key(ab, 1)))
            .unwrap();

        assert_eq!(index.element_at(key(abc, 30), a), Some(ElementId(1)));
        assert_eq!(index.element_at(key(abc, 30), abc), Some(ElementId(30)));
        assert_eq!(
            index.element_at(key(abc, 30), PathId::ROOT),
            Some(ElementId::ROOT)
        );
    }

    #[test]
    fn test_identity_assignment() {
        let mut index = PathIndex::new();
        let ident = IdentificationId(1);
        index.set_identity(ident, ElementId(5), Identity::key(42));
        assert_eq!(
            index.identity(ident, ElementId(5)),
            Some(&Identity::key(42))
        );
        index.remove_identities_of(ElementId(5));
        assert_eq!(index.identity(ident, ElementId(5)), None);
    }

    #[test]
    fn test_reserved_and_claimed_ids_never_collide() {
        let mut index = PathIndex::new();
        index.claim_element(ElementId(10));
        let fresh = index.reserve_element();
        assert!(fresh.0 > 10);
    }
}
