//! Merge domain tables and the merge group itself

pub mod comparison;
pub mod group;
pub mod identity_nodes;
pub mod source_nodes;
pub mod target_map;

pub use comparison::DominatedComparison;
pub use group::{LevelOutcome, MergeGroup};
pub use identity_nodes::{IdentityNodes, PendingChild};
pub use source_nodes::SourceNodes;
pub use target_map::TargetIdMap;
