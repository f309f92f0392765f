//! Merge application layer

pub mod runtime;

pub use runtime::{MergeRuntime, NodeChange};
