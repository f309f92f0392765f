//! Group descriptors and mapping keys

use crate::shared::models::ids::IndexerId;
use pathmerge_store::{IdentificationId, PathId};
use serde::{Deserialize, Serialize};

/// Declared shape of one merge group, produced by the mapping compiler
/// above this core. Two declarations with the same `description` collapse
/// into one group object per target indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub source_indexer: IndexerId,
    pub source_path: PathId,
    pub target_path: PathId,
    pub priority: i32,
    /// True for the group at the actual projected source path; its ids are
    /// the unraised ids a projection reports.
    pub is_maximal: bool,
    /// True when the group merges by identity value rather than element id.
    pub is_identity: bool,
    pub source_identification: Option<IdentificationId>,
    pub target_identification: Option<IdentificationId>,
    /// Unique key for deduplication.
    pub description: String,
}

impl GroupDescriptor {
    /// Whether this descriptor could share a chain with `prefix`: a group
    /// and its prefix group share source identification id.
    pub fn chain_compatible(&self, prefix: &GroupDescriptor) -> bool {
        self.source_indexer == prefix.source_indexer
            && self.source_identification == prefix.source_identification
    }
}

/// One (query result, projection) association carried by a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingKey {
    pub result: u32,
    pub proj: u32,
}

impl MappingKey {
    pub fn new(result: u32, proj: u32) -> Self {
        Self { result, proj }
    }
}
