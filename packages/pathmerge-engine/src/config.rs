//! Engine configuration

use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Tuning knobs for a merge runtime instance.
///
/// All fields have workable defaults; `validate()` rejects configurations
/// that would make the scheduler degenerate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial capacity of the dirty-path-node heap
    pub path_heap_capacity: usize,

    /// Emit per-element trace events during merging (verbose)
    pub trace_merges: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path_heap_capacity: 64,
            trace_merges: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path_heap_capacity == 0 {
            return Err(EngineError::config("path_heap_capacity must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_heap_capacity_rejected() {
        let config = EngineConfig {
            path_heap_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"trace_merges": true}"#).unwrap();
        assert!(config.trace_merges);
        assert_eq!(config.path_heap_capacity, 64);

        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.path_heap_capacity, config.path_heap_capacity);
        assert_eq!(back.trace_merges, config.trace_merges);
    }
}
