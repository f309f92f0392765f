//! Scheduling domain: queue containers

pub mod queues;

pub use queues::{FlagQueue, PathNodeEntry, PathNodeHeap};
