//! Node addressing and node records

use crate::domain::value::SimpleValue;
use serde::{Deserialize, Serialize};

/// Interned address in the hierarchical attribute tree.
///
/// `PathId::ROOT` is the empty path and is always allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathId(pub u32);

impl PathId {
    pub const ROOT: PathId = PathId(0);

    pub fn is_root(self) -> bool {
        self == PathId::ROOT
    }
}

/// Identifies a node at a path; unique within an indexer.
///
/// `ElementId::ROOT` (zero) is the root element of every indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u32);

impl ElementId {
    pub const ROOT: ElementId = ElementId(0);

    pub fn is_root(self) -> bool {
        self == ElementId::ROOT
    }
}

/// Names one identity-assignment table inside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentificationId(pub u32);

/// Full address of a node: which path it sits at and which element it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub path: PathId,
    pub element: ElementId,
}

impl NodeKey {
    pub fn new(path: PathId, element: ElementId) -> Self {
        Self { path, element }
    }

    /// The root node of an indexer.
    pub fn root() -> Self {
        Self {
            path: PathId::ROOT,
            element: ElementId::ROOT,
        }
    }
}

/// What kind of node sits at an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A genuine data element with independent identity and lifecycle
    Data,
    /// An operator node; its operands are its children at the same path
    Operator,
    /// A non-data attribute node sharing its element id with its parent
    Attribute,
}

/// Stored state of one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub parent: Option<NodeKey>,
    pub value: Option<SimpleValue>,
    pub children: Vec<NodeKey>,
}

impl NodeRecord {
    pub fn new(key: NodeKey, kind: NodeKind, parent: Option<NodeKey>) -> Self {
        Self {
            key,
            kind,
            parent,
            value: None,
            children: Vec::new(),
        }
    }

    pub fn is_data_element(&self) -> bool {
        self.kind == NodeKind::Data
    }
}
