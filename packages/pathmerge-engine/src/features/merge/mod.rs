//! Merge feature
//!
//! Group-based incremental mapping of element-id deltas from source paths
//! into a target structure: ancestor raising, reference-counted merging,
//! operator raising and identity semantics live in `domain/`; the merge
//! runtime that owns the group chain, the target tree and the scheduler
//! glue lives in `application/`.

pub mod application;
pub mod domain;
