//! Ordering descriptors
//!
//! A comparison over a group's dominated elements is data, not a class
//! hierarchy: the descriptor names the upstream comparator and says whether
//! identity values break its ties (identity groups only).

use crate::shared::models::ids::{ComparisonId, GroupId};
use pathmerge_store::IdentificationId;
use serde::{Deserialize, Serialize};

/// Describes how a group's merged elements are ordered for consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DominatedComparison {
    pub group: GroupId,
    /// Upstream comparator, when the consumer registered one.
    pub base: Option<ComparisonId>,
    /// Identity groups break upstream ties by identity value.
    pub identity_tiebreak: bool,
    /// Which identification table supplies the tie-breaking values.
    pub identification: Option<IdentificationId>,
}

impl DominatedComparison {
    pub fn plain(group: GroupId, base: Option<ComparisonId>) -> Self {
        Self {
            group,
            base,
            identity_tiebreak: false,
            identification: None,
        }
    }

    pub fn with_identity_tiebreak(
        group: GroupId,
        base: Option<ComparisonId>,
        identification: Option<IdentificationId>,
    ) -> Self {
        Self {
            group,
            base,
            identity_tiebreak: true,
            identification,
        }
    }
}
