//! Configuration constants and tunables.

use crate::common::{Error, Result};

/// Size of a stream identifier in bytes.
///
/// Stream ids are written raw wherever a node or a row refers to another
/// stream (leaf links, routing children, deferred non-native values).
pub const STREAM_ID_SIZE: usize = 8;

/// Size of an index node header in bytes.
///
/// # Layout
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     node_type (Routing = 0, Data = 1)
/// 1       8     prior_node (StreamId, little-endian)
/// 9       8     next_node (StreamId, little-endian)
/// 17      4     entry_count (i32, little-endian)
/// ```
pub const NODE_HEADER_SIZE: usize = 1 + STREAM_ID_SIZE + STREAM_ID_SIZE + 4;

/// Size of the persisted index header stream in bytes.
pub const INDEX_HEADER_SIZE: usize = 4 * 4 + 3 * STREAM_ID_SIZE + 4;

/// Default maximum number of entries in a routing node.
pub const DEFAULT_FANOUT: usize = 64;

/// Default maximum number of entries in a data (leaf) node.
pub const DEFAULT_CAPACITY: usize = 64;

/// Node sizing for a B+Tree index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexConfig {
    /// Maximum entries per routing node.
    pub fanout: usize,
    /// Maximum entries per data node.
    pub capacity: usize,
}

impl IndexConfig {
    /// Create a validated config.
    ///
    /// # Errors
    /// Returns `Error::InvalidDefinition` if `fanout < 3` or `capacity < 2`.
    pub fn new(fanout: usize, capacity: usize) -> Result<Self> {
        let config = Self { fanout, capacity };
        config.validate()?;
        Ok(config)
    }

    /// Check the node sizing limits.
    pub fn validate(&self) -> Result<()> {
        if self.fanout < 3 {
            return Err(Error::InvalidDefinition(format!(
                "fanout must be at least 3, got {}",
                self.fanout
            )));
        }
        if self.capacity < 2 {
            return Err(Error::InvalidDefinition(format!(
                "capacity must be at least 2, got {}",
                self.capacity
            )));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fanout: DEFAULT_FANOUT,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Settings shared by everything an execution context creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Sizing for every table index created during execution.
    pub index: IndexConfig,
}

impl EngineConfig {
    /// Use the given index sizing.
    pub fn with_index(index: IndexConfig) -> Self {
        Self { index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_header_size() {
        assert_eq!(NODE_HEADER_SIZE, 21);
        assert_eq!(INDEX_HEADER_SIZE, 44);
    }

    #[test]
    fn test_index_config_validation() {
        assert!(IndexConfig::new(3, 2).is_ok());
        assert!(IndexConfig::new(2, 2).is_err());
        assert!(IndexConfig::new(4, 1).is_err());
        assert!(IndexConfig::default().validate().is_ok());
    }
}
