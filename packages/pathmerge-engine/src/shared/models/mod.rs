//! Shared engine models

pub mod delta;
pub mod group;
pub mod ids;

pub use delta::{GroupSlots, IdentityDelta, MergeOutcome, MergeTail, Slot};
pub use group::{GroupDescriptor, MappingKey};
pub use ids::{
    ComparisonId, CompletionTaskId, GroupId, IdAlloc, IndexerId, OrderServiceId, PathNodeKey,
};
