//! Host integration hooks
//!
//! The runtime calls these outward at well-defined points. All methods have
//! empty defaults so hosts implement only what they observe.

use crate::shared::models::ids::{ComparisonId, CompletionTaskId, OrderServiceId, PathNodeKey};

/// Callbacks from the runtime to its host.
///
/// Wake-up on new scheduled work is not a hook: it is the callback
/// installed on the scheduler via `set_wake_callback`.
pub trait RuntimeHooks {
    /// A settled path node has changes an order service should pick up.
    fn refresh_order_service(&mut self, _id: OrderServiceId) {}

    /// A comparison function registered for cleanup can now be released.
    fn cleanup_comparison(&mut self, _id: ComparisonId) {}

    /// An end-of-cycle completion task is running.
    fn complete_cycle(&mut self, _id: CompletionTaskId) {}

    /// A path node's epilogue finished.
    fn path_node_settled(&mut self, _key: PathNodeKey) {}
}

/// Hooks implementation that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RuntimeHooks for NoopHooks {}
