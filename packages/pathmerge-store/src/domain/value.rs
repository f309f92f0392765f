//! Simple values and identity values
//!
//! Identities are application-level values used to match elements across
//! trees, independent of raw element ids. They must be usable as hash-map
//! keys, so numbers compare by bit pattern rather than IEEE equality
//! (NaN == NaN here, -0.0 != 0.0).

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A plain attribute value stored on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimpleValue {
    Undefined,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
}

impl PartialEq for SimpleValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SimpleValue::Undefined, SimpleValue::Undefined) => true,
            (SimpleValue::Bool(a), SimpleValue::Bool(b)) => a == b,
            (SimpleValue::Int(a), SimpleValue::Int(b)) => a == b,
            (SimpleValue::Num(a), SimpleValue::Num(b)) => a.to_bits() == b.to_bits(),
            (SimpleValue::Str(a), SimpleValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SimpleValue {}

impl Hash for SimpleValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            SimpleValue::Undefined => state.write_u8(0),
            SimpleValue::Bool(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            SimpleValue::Int(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            SimpleValue::Num(n) => {
                state.write_u8(3);
                n.to_bits().hash(state);
            }
            SimpleValue::Str(s) => {
                state.write_u8(4);
                s.hash(state);
            }
        }
    }
}

impl SimpleValue {
    pub fn is_defined(&self) -> bool {
        !matches!(self, SimpleValue::Undefined)
    }
}

/// Identity value used for cross-tree matching.
///
/// Either a simple value or a compressed key computed by the identification
/// layer above the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Value(SimpleValue),
    Key(u64),
}

impl Identity {
    pub fn value(v: SimpleValue) -> Self {
        Identity::Value(v)
    }

    pub fn key(k: u64) -> Self {
        Identity::Key(k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_num_identity_by_bits() {
        let a = SimpleValue::Num(f64::NAN);
        let b = SimpleValue::Num(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(SimpleValue::Num(0.0), SimpleValue::Num(-0.0));
    }

    #[test]
    fn test_identity_as_map_key() {
        let mut map = HashMap::new();
        map.insert(Identity::value(SimpleValue::Str("x".into())), 1u32);
        map.insert(Identity::key(7), 2u32);

        assert_eq!(
            map.get(&Identity::value(SimpleValue::Str("x".into()))),
            Some(&1)
        );
        assert_eq!(map.get(&Identity::key(7)), Some(&2));
        assert_eq!(map.get(&Identity::key(8)), None);
    }
}
