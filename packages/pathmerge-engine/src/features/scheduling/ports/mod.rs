//! Scheduling ports
//!
//! The executor owns queue order and the time budget; everything it knows
//! about the scheduled objects goes through `ScheduleHost`. Idempotency
//! flags live on the owning objects, so the host both answers "is this
//! entry still scheduled?" and runs the entry's action.

use crate::features::scheduling::application::executor::UpdateScheduler;
use crate::shared::models::ids::{
    ComparisonId, CompletionTaskId, GroupId, IndexerId, OrderServiceId, PathNodeKey,
};

/// Host side of the update scheduler.
///
/// Every `take_*` clears the entry's scheduled flag and reports whether it
/// was still set; entries whose flag was cleared since enqueue (cancelled)
/// or whose owner was destroyed report `false` and are skipped. Every
/// `run_*` receives the scheduler back so re-entrant scheduling from inside
/// the action is possible.
pub trait ScheduleHost {
    fn take_identity_scheduled(&mut self, group: GroupId) -> bool;
    fn run_identity_update(&mut self, sched: &mut UpdateScheduler, group: GroupId);

    fn take_path_node_scheduled(&mut self, key: PathNodeKey) -> bool;
    fn run_path_node_epilogue(&mut self, sched: &mut UpdateScheduler, key: PathNodeKey);

    fn take_comparison_scheduled(&mut self, id: ComparisonId) -> bool;
    fn run_comparison_cleanup(&mut self, sched: &mut UpdateScheduler, id: ComparisonId);

    fn take_order_service_scheduled(&mut self, id: OrderServiceId) -> bool;
    fn run_order_service_refresh(&mut self, sched: &mut UpdateScheduler, id: OrderServiceId);

    fn take_completion_scheduled(&mut self, id: CompletionTaskId) -> bool;
    fn run_completion_task(&mut self, sched: &mut UpdateScheduler, id: CompletionTaskId);

    fn take_data_cleanup_scheduled(&mut self, indexer: IndexerId) -> bool;
    fn run_data_element_cleanup(&mut self, sched: &mut UpdateScheduler, indexer: IndexerId);
}
