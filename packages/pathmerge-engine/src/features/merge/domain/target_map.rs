//! Target-id translation
//!
//! When a merged source id must diverge from the id it is merged into —
//! sibling groups whose contributions must stay distinguishable, or an id
//! already taken at the target path — the group assigns a translated target
//! id, stable per `(source id, target path, dominating id)`.

use crate::shared::models::ids::IdAlloc;
use pathmerge_store::{ElementId, PathId};
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct TargetIdMap {
    map: FxHashMap<(ElementId, PathId, ElementId), ElementId>,
}

impl TargetIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigned target id for the triple, allocating on first use.
    pub fn translate(
        &mut self,
        source: ElementId,
        target_path: PathId,
        dominating: ElementId,
        alloc: &mut IdAlloc,
    ) -> ElementId {
        *self
            .map
            .entry((source, target_path, dominating))
            .or_insert_with(|| alloc.next())
    }

    pub fn lookup(
        &self,
        source: ElementId,
        target_path: PathId,
        dominating: ElementId,
    ) -> Option<ElementId> {
        self.map.get(&(source, target_path, dominating)).copied()
    }

    /// Forget an assignment once the merged node is removed.
    pub fn release(
        &mut self,
        source: ElementId,
        target_path: PathId,
        dominating: ElementId,
    ) -> Option<ElementId> {
        self.map.remove(&(source, target_path, dominating))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translation_is_stable_until_released() {
        let mut map = TargetIdMap::new();
        let mut alloc = IdAlloc::new();

        let t1 = map.translate(ElementId(3), PathId(1), ElementId(0), &mut alloc);
        let t2 = map.translate(ElementId(3), PathId(1), ElementId(0), &mut alloc);
        assert_eq!(t1, t2);

        // Different dominating node: different assignment.
        let t3 = map.translate(ElementId(3), PathId(1), ElementId(9), &mut alloc);
        assert_ne!(t1, t3);

        assert_eq!(map.release(ElementId(3), PathId(1), ElementId(0)), Some(t1));
        let t4 = map.translate(ElementId(3), PathId(1), ElementId(0), &mut alloc);
        assert_ne!(t1, t4);
    }
}
