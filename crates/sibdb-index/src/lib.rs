//! Node-grouped, sibling-linked B+ tree index for SibDB.
//!
//! This crate provides:
//! - Node groups: fixed blocks of equal-sized nodes sharing one occupancy bitmap
//! - Leaf node groups holding key/value entries, doubly linked to their siblings
//! - Internal node groups holding routing (high) keys and one child per node
//! - Breadcrumb trails recorded on descent for split propagation
//! - `NodeGroupTree`, the single-owner tree, and `SiblingIndex`, its shared
//!   reader-writer locked form
//!
//! Keys may repeat: each `insert` stores one entry and `lookup` returns the set
//! of values stored under a key. Deletes tombstone slots in place.

mod breadcrumb;
mod constants;
mod index;
mod internal;
mod leaf;
mod node_group;
mod store;
mod tree;

pub use breadcrumb::{Breadcrumb, SlotAddress};
pub use constants::MIN_HEIGHT;
pub use index::SiblingIndex;
pub use internal::InternalNodeGroup;
pub use leaf::{InsertPlan, LeafEntry, LeafNodeGroup};
pub use node_group::{
    ChildRef, GroupGeometry, InternalGroupId, LeafGroupId, NodeGroup, Occupancy,
};
pub use sibdb_common::{IndexConfig, Result, SibDbError};
pub use tree::{Entries, IndexStats, NodeGroupTree};
