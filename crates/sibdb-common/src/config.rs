//! Configuration structures for SibDB.

use crate::error::{Result, SibDbError};
use serde::{Deserialize, Serialize};

/// Geometry of a node-group index.
///
/// Only the leaf geometry is configured. Internal groups are cross-wired from
/// it: an internal node has one slot per leaf node but one, and an internal
/// group has one node per leaf slot but one. Every leaf group of a tree shares
/// the leaf geometry and every internal group shares the internal geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Slots per leaf node.
    pub leaf_node_size: usize,
    /// Nodes per leaf group.
    pub nodes_per_leaf_group: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            leaf_node_size: 16,
            nodes_per_leaf_group: 16,
        }
    }
}

impl IndexConfig {
    /// Smallest leaf node size that still gives internal groups two nodes to split.
    pub const MIN_LEAF_NODE_SIZE: usize = 3;

    /// Smallest leaf group width that still gives internal nodes a routing slot.
    pub const MIN_NODES_PER_LEAF_GROUP: usize = 2;

    /// Creates a config with the given leaf geometry.
    pub fn new(leaf_node_size: usize, nodes_per_leaf_group: usize) -> Self {
        Self {
            leaf_node_size,
            nodes_per_leaf_group,
        }
    }

    /// Rejects geometries whose derived internal groups could never split.
    pub fn validate(&self) -> Result<()> {
        if self.leaf_node_size < Self::MIN_LEAF_NODE_SIZE {
            return Err(SibDbError::InvalidParameter {
                name: "leaf_node_size".to_string(),
                value: self.leaf_node_size.to_string(),
            });
        }
        if self.nodes_per_leaf_group < Self::MIN_NODES_PER_LEAF_GROUP {
            return Err(SibDbError::InvalidParameter {
                name: "nodes_per_leaf_group".to_string(),
                value: self.nodes_per_leaf_group.to_string(),
            });
        }
        if self.leaf_group_capacity() > u32::MAX as usize
            || self.internal_group_capacity() > u32::MAX as usize
        {
            return Err(SibDbError::ConfigError(format!(
                "group of {}x{} slots is too large to address",
                self.nodes_per_leaf_group, self.leaf_node_size
            )));
        }
        Ok(())
    }

    /// Routing slots per internal node.
    #[inline]
    pub fn internal_node_size(&self) -> usize {
        self.nodes_per_leaf_group - 1
    }

    /// Nodes per internal group.
    #[inline]
    pub fn nodes_per_internal_group(&self) -> usize {
        self.leaf_node_size - 1
    }

    /// Total slots in one leaf group.
    #[inline]
    pub fn leaf_group_capacity(&self) -> usize {
        self.leaf_node_size * self.nodes_per_leaf_group
    }

    /// Total routing slots in one internal group.
    #[inline]
    pub fn internal_group_capacity(&self) -> usize {
        self.internal_node_size() * self.nodes_per_internal_group()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_config_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.leaf_node_size, 16);
        assert_eq!(config.nodes_per_leaf_group, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_internal_geometry_is_cross_wired() {
        let config = IndexConfig::new(5, 4);
        assert_eq!(config.internal_node_size(), 3);
        assert_eq!(config.nodes_per_internal_group(), 4);
        assert_eq!(config.leaf_group_capacity(), 20);
        assert_eq!(config.internal_group_capacity(), 12);
    }

    #[test]
    fn test_smallest_geometry() {
        let config = IndexConfig::new(3, 3);
        assert!(config.validate().is_ok());
        assert_eq!(config.leaf_group_capacity(), 9);
        assert_eq!(config.internal_node_size(), 2);
        assert_eq!(config.nodes_per_internal_group(), 2);
    }

    #[test]
    fn test_validate_rejects_small_leaf_nodes() {
        let err = IndexConfig::new(2, 8).validate().unwrap_err();
        assert!(matches!(
            err,
            SibDbError::InvalidParameter { ref name, .. } if name == "leaf_node_size"
        ));
    }

    #[test]
    fn test_validate_rejects_single_node_groups() {
        let err = IndexConfig::new(8, 1).validate().unwrap_err();
        assert_eq!(err.to_string(), "Invalid parameter: nodes_per_leaf_group = 1");
    }

    #[test]
    fn test_index_config_serde_roundtrip() {
        let original = IndexConfig::new(7, 9);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: IndexConfig = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_index_config_from_json() {
        let config: IndexConfig =
            serde_json::from_str(r#"{"leaf_node_size":4,"nodes_per_leaf_group":6}"#).unwrap();
        assert_eq!(config.internal_node_size(), 5);
        assert_eq!(config.nodes_per_internal_group(), 3);
    }
}
