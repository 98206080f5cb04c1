//! Slot addresses and descent breadcrumbs.

use crate::node_group::InternalGroupId;

/// One slot inside a group: a node index and an offset within that node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    /// Node index within the group.
    pub node: usize,
    /// Offset within the node.
    pub offset: usize,
}

impl SlotAddress {
    /// Sentinel returned by scans that found nothing.
    pub const INVALID: SlotAddress = SlotAddress {
        node: usize::MAX,
        offset: usize::MAX,
    };

    /// Creates a slot address.
    #[inline]
    pub const fn new(node: usize, offset: usize) -> Self {
        Self { node, offset }
    }

    /// Returns true if this is not the INVALID sentinel.
    #[inline]
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Builds an address from an absolute slot index.
    #[inline]
    pub fn from_index(index: usize, node_size: usize) -> Self {
        Self {
            node: index / node_size,
            offset: index % node_size,
        }
    }

    /// Absolute slot index of this address.
    #[inline]
    pub fn to_index(&self, node_size: usize) -> usize {
        self.node * node_size + self.offset
    }
}

impl std::fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "{}.{}", self.node, self.offset)
        } else {
            write!(f, "invalid")
        }
    }
}

/// One level of a root-to-leaf descent: the internal group visited and the
/// routing slot chosen in it.
///
/// A trail of breadcrumbs (root first) is kept for the duration of a mutation
/// so that high-key updates and split propagation can walk back up without
/// descending again. A trail is stale once any group on it has been split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breadcrumb {
    pub group: InternalGroupId,
    pub slot: SlotAddress,
}

impl Breadcrumb {
    #[inline]
    pub fn new(group: InternalGroupId, slot: SlotAddress) -> Self {
        Self { group, slot }
    }
}
