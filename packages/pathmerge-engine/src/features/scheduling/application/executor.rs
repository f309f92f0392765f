//! The update scheduler and its drive loop
//!
//! `execute_scheduled` drains the six queues in strict priority order under
//! a cooperative deadline. Identity work is fully drained before path-node
//! work; both are fully drained before any lower queue runs; when a lower
//! queue produces new identity or path-node work, control returns to the
//! top of the loop before continuing. A timed-out drain is expected, not an
//! error: queues are truncated, never restarted, so a later call resumes
//! the remaining work.

use crate::features::scheduling::domain::queues::{FlagQueue, PathNodeHeap};
use crate::features::scheduling::ports::ScheduleHost;
use crate::shared::models::ids::{
    ComparisonId, CompletionTaskId, GroupId, IndexerId, OrderServiceId, PathNodeKey,
};
use crate::shared::ports::timer::DeadlineTimer;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// Priority-ordered queues of deferred work.
///
/// The scheduler owns no idempotency state: the boolean scheduled flag
/// lives on each schedulable object, and the runtime consults it before
/// calling `schedule_*`. Entries here may therefore be stale; the executor
/// skips any entry whose flag was cleared since enqueue.
pub struct UpdateScheduler {
    identity: FlagQueue<GroupId>,
    path_nodes: PathNodeHeap,
    comparisons: FlagQueue<ComparisonId>,
    order_services: FlagQueue<OrderServiceId>,
    completions: FlagQueue<CompletionTaskId>,
    data_cleanup: FlagQueue<IndexerId>,
    /// Unresolved path-node work per indexer, for "does this indexer have
    /// pending work?" queries from collaborators.
    pending_by_indexer: FxHashMap<IndexerId, usize>,
    /// Host wake callback, fired on the empty→non-empty transition of the
    /// path-node heap.
    wake: Option<Box<dyn FnMut()>>,
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("identity", &self.identity.len())
            .field("path_nodes", &self.path_nodes.len())
            .field("comparisons", &self.comparisons.len())
            .field("order_services", &self.order_services.len())
            .field("completions", &self.completions.len())
            .field("data_cleanup", &self.data_cleanup.len())
            .finish()
    }
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(path_heap_capacity: usize) -> Self {
        Self {
            identity: FlagQueue::new(),
            path_nodes: PathNodeHeap::with_capacity(path_heap_capacity),
            comparisons: FlagQueue::new(),
            order_services: FlagQueue::new(),
            completions: FlagQueue::new(),
            data_cleanup: FlagQueue::new(),
            pending_by_indexer: FxHashMap::default(),
            wake: None,
        }
    }

    /// Install the host wake callback.
    pub fn set_wake_callback(&mut self, wake: Box<dyn FnMut()>) {
        self.wake = Some(wake);
    }

    // ── Enqueue operations (fire-and-forget) ──────────────────────────
    //
    // Callers guarantee idempotency through the owner's scheduled flag;
    // these methods only enqueue.

    pub fn schedule_identity_update(&mut self, group: GroupId) {
        trace!(group = group.0, "schedule identity update");
        self.identity.push(group);
    }

    pub fn schedule_path_node(&mut self, key: PathNodeKey, depth: u32) {
        trace!(
            indexer = key.indexer.0,
            path = key.path.0,
            depth,
            "schedule path node"
        );
        *self.pending_by_indexer.entry(key.indexer).or_insert(0) += 1;
        let was_empty = self.path_nodes.push(key, depth);
        if was_empty {
            if let Some(wake) = self.wake.as_mut() {
                wake();
            }
        }
    }

    pub fn schedule_comp_cleanup(&mut self, id: ComparisonId) {
        self.comparisons.push(id);
    }

    pub fn schedule_order_service(&mut self, id: OrderServiceId) {
        self.order_services.push(id);
    }

    pub fn schedule_complete_incremental_update(&mut self, id: CompletionTaskId) {
        self.completions.push(id);
    }

    pub fn schedule_data_elements(&mut self, indexer: IndexerId) {
        self.data_cleanup.push(indexer);
    }

    // ── Introspection ─────────────────────────────────────────────────

    /// Does `indexer` have unresolved path-node work?
    pub fn has_pending(&self, indexer: IndexerId) -> bool {
        self.pending_by_indexer
            .get(&indexer)
            .is_some_and(|n| *n > 0)
    }

    pub fn has_high_priority_work(&self) -> bool {
        !self.identity.is_empty() || !self.path_nodes.is_empty()
    }

    pub fn is_idle(&self) -> bool {
        self.identity.is_empty()
            && self.path_nodes.is_empty()
            && self.comparisons.is_empty()
            && self.order_services.is_empty()
            && self.completions.is_empty()
            && self.data_cleanup.is_empty()
    }

    fn note_path_node_popped(&mut self, indexer: IndexerId) {
        if let Some(n) = self.pending_by_indexer.get_mut(&indexer) {
            *n = n.saturating_sub(1);
        }
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// How one queue drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainStatus {
    /// Queue is empty.
    Done,
    /// Deadline hit; processed prefix truncated, remainder kept.
    TimedOut,
    /// Higher-priority work appeared; go back to the top of the loop.
    Reprioritize,
}

/// The driver loop.
///
/// Returns `true` iff every requested queue ended empty; `false` when the
/// supplied deadline was hit first. With `identity_and_path_only` the loop
/// stops once the identity and path-node queues are empty — the partial
/// drain used for nested re-entrant flushes.
pub fn execute_scheduled<H: ScheduleHost>(
    sched: &mut UpdateScheduler,
    host: &mut H,
    timer: &dyn DeadlineTimer,
    identity_and_path_only: bool,
) -> bool {
    loop {
        if !drain_identity(sched, host, timer) {
            return false;
        }
        match drain_path_nodes(sched, host, timer) {
            DrainStatus::TimedOut => return false,
            DrainStatus::Reprioritize => continue,
            DrainStatus::Done => {}
        }
        // Identity work produced by an epilogue restarts the pass.
        if sched.has_high_priority_work() {
            continue;
        }
        if identity_and_path_only {
            return true;
        }

        match drain_comparisons(sched, host, timer) {
            DrainStatus::TimedOut => return false,
            DrainStatus::Reprioritize => continue,
            DrainStatus::Done => {}
        }
        match drain_order_services(sched, host, timer) {
            DrainStatus::TimedOut => return false,
            DrainStatus::Reprioritize => continue,
            DrainStatus::Done => {}
        }
        match drain_completions(sched, host, timer) {
            DrainStatus::TimedOut => return false,
            DrainStatus::Reprioritize => continue,
            DrainStatus::Done => {}
        }
        // Data-element cleanup runs once, last.
        match drain_data_cleanup(sched, host, timer) {
            DrainStatus::TimedOut => return false,
            DrainStatus::Reprioritize => continue,
            DrainStatus::Done => {}
        }

        if sched.is_idle() {
            debug!("scheduled work fully drained");
            return true;
        }
        // A cleanup scheduled new work; take it from the top.
    }
}

fn drain_identity<H: ScheduleHost>(
    sched: &mut UpdateScheduler,
    host: &mut H,
    timer: &dyn DeadlineTimer,
) -> bool {
    let mut i = 0;
    while let Some(group) = sched.identity.get(i) {
        i += 1;
        if !host.take_identity_scheduled(group) {
            continue;
        }
        host.run_identity_update(sched, group);
        if timer.timed_out() {
            sched.identity.truncate_front(i);
            return false;
        }
    }
    sched.identity.clear();
    true
}

fn drain_path_nodes<H: ScheduleHost>(
    sched: &mut UpdateScheduler,
    host: &mut H,
    timer: &dyn DeadlineTimer,
) -> DrainStatus {
    while let Some(entry) = sched.path_nodes.pop() {
        let still_scheduled = host.take_path_node_scheduled(entry.key);
        sched.note_path_node_popped(entry.key.indexer);
        if !still_scheduled {
            continue;
        }
        host.run_path_node_epilogue(sched, entry.key);
        if timer.timed_out() {
            return DrainStatus::TimedOut;
        }
        // Identity work that appeared meanwhile outranks the heap.
        if !sched.identity.is_empty() {
            return DrainStatus::Reprioritize;
        }
    }
    DrainStatus::Done
}

macro_rules! drain_fifo {
    ($name:ident, $queue:ident, $take:ident, $run:ident) => {
        fn $name<H: ScheduleHost>(
            sched: &mut UpdateScheduler,
            host: &mut H,
            timer: &dyn DeadlineTimer,
        ) -> DrainStatus {
            let mut i = 0;
            while let Some(entry) = sched.$queue.get(i) {
                i += 1;
                if !host.$take(entry) {
                    continue;
                }
                host.$run(sched, entry);
                if timer.timed_out() {
                    sched.$queue.truncate_front(i);
                    return DrainStatus::TimedOut;
                }
                if sched.has_high_priority_work() {
                    sched.$queue.truncate_front(i);
                    return DrainStatus::Reprioritize;
                }
            }
            sched.$queue.clear();
            DrainStatus::Done
        }
    };
}

drain_fifo!(
    drain_comparisons,
    comparisons,
    take_comparison_scheduled,
    run_comparison_cleanup
);
drain_fifo!(
    drain_order_services,
    order_services,
    take_order_service_scheduled,
    run_order_service_refresh
);
drain_fifo!(
    drain_completions,
    completions,
    take_completion_scheduled,
    run_completion_task
);
drain_fifo!(
    drain_data_cleanup,
    data_cleanup,
    take_data_cleanup_scheduled,
    run_data_element_cleanup
);
