//! Queue containers for the update scheduler
//!
//! FIFO queues are walked by index, never shifted while iterating: new
//! entries may be appended from inside the very callbacks a drain runs.
//! On timeout the processed prefix is truncated so a later drain resumes
//! exactly where this one stopped.
//!
//! Idempotency is not the queues' concern: the boolean scheduled flag lives
//! on the owning object, and the executor consults it through the host.

use crate::shared::models::ids::PathNodeKey;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Index-walked FIFO queue of copyable entries.
#[derive(Debug, Clone)]
pub struct FlagQueue<T: Copy> {
    entries: Vec<T>,
}

impl<T: Copy> FlagQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: T) {
        self.entries.push(entry);
    }

    /// Entry at walk position `i`, if any. Copies out so the caller holds
    /// no borrow while running the entry's action.
    pub fn get(&self, i: usize) -> Option<T> {
        self.entries.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the processed prefix, keeping the remaining work for the next
    /// drain call.
    pub fn truncate_front(&mut self, processed: usize) {
        let n = processed.min(self.entries.len());
        self.entries.drain(..n);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Copy> Default for FlagQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Heap entry for a dirty path node.
///
/// Ordering favors deeper paths; ties break by scheduling sequence number
/// (first scheduled first), which keeps pop order deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNodeEntry {
    pub depth: u32,
    pub seq: u64,
    pub key: PathNodeKey,
}

impl Ord for PathNodeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: greater = popped first. Deeper paths win; among equal
        // depths the earlier sequence number wins.
        self.depth
            .cmp(&other.depth)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PathNodeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority heap of dirty path nodes.
#[derive(Debug, Default)]
pub struct PathNodeHeap {
    heap: BinaryHeap<PathNodeEntry>,
    next_seq: u64,
}

impl PathNodeHeap {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            next_seq: 0,
        }
    }

    /// Push a dirty node. Returns true when the heap was empty before,
    /// i.e. this push is the empty→non-empty transition.
    pub fn push(&mut self, key: PathNodeKey, depth: u32) -> bool {
        let was_empty = self.heap.is_empty();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PathNodeEntry { depth, seq, key });
        was_empty
    }

    pub fn pop(&mut self) -> Option<PathNodeEntry> {
        self.heap.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::ids::IndexerId;
    use pathmerge_store::PathId;

    fn key(path: u32) -> PathNodeKey {
        PathNodeKey::new(IndexerId(0), PathId(path))
    }

    #[test]
    fn test_flag_queue_truncate_front() {
        let mut q = FlagQueue::new();
        q.push(1u32);
        q.push(2);
        q.push(3);
        q.truncate_front(2);
        assert_eq!(q.get(0), Some(3));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_flag_queue_append_during_walk() {
        let mut q = FlagQueue::new();
        q.push(1u32);
        let mut seen = Vec::new();
        let mut i = 0;
        while let Some(entry) = q.get(i) {
            i += 1;
            seen.push(entry);
            if entry == 1 {
                q.push(2);
            }
        }
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_heap_pops_deeper_paths_first() {
        let mut heap = PathNodeHeap::default();
        heap.push(key(1), 1);
        heap.push(key(2), 3);
        heap.push(key(3), 2);

        assert_eq!(heap.pop().unwrap().key, key(2));
        assert_eq!(heap.pop().unwrap().key, key(3));
        assert_eq!(heap.pop().unwrap().key, key(1));
    }

    #[test]
    fn test_heap_breaks_depth_ties_by_schedule_order() {
        let mut heap = PathNodeHeap::default();
        heap.push(key(7), 2);
        heap.push(key(8), 2);
        heap.push(key(9), 2);

        assert_eq!(heap.pop().unwrap().key, key(7));
        assert_eq!(heap.pop().unwrap().key, key(8));
        assert_eq!(heap.pop().unwrap().key, key(9));
    }

    #[test]
    fn test_heap_reports_empty_to_nonempty() {
        let mut heap = PathNodeHeap::default();
        assert!(heap.push(key(1), 1));
        assert!(!heap.push(key(2), 1));
        heap.pop();
        heap.pop();
        assert!(heap.push(key(3), 1));
    }
}
