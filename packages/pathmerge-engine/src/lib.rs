/*
 * pathmerge-engine - incremental merge/indexing core
 *
 * Feature-First Hexagonal Architecture:
 * - shared/     : ids, deltas, group descriptors, outward port traits
 * - features/   : vertical slices (scheduling, merge)
 *
 * The engine maintains a derived target tree by continuously merging source
 * trees into it according to declared mapping rules. Two subsystems:
 * - merge   : group-based incremental mapping with identity semantics,
 *             ancestor raising and reference counting
 * - scheduling : priority-ordered, resumable execution of deferred
 *             per-path-node finalization work
 *
 * Single-threaded and cooperative: the fixed queue priority order is the
 * only synchronization mechanism.
 */

pub mod config;
pub mod errors;
pub mod features;
pub mod shared;

pub use config::EngineConfig;
pub use errors::{EngineError, Result};
pub use features::merge::application::runtime::MergeRuntime;
pub use features::scheduling::application::executor::{execute_scheduled, UpdateScheduler};
pub use shared::models::{
    ComparisonId, CompletionTaskId, GroupDescriptor, GroupId, GroupSlots, IndexerId, MappingKey,
    MergeOutcome, MergeTail, OrderServiceId, PathNodeKey, Slot,
};
pub use shared::ports::{DeadlineTimer, NeverExpires, RuntimeHooks};
