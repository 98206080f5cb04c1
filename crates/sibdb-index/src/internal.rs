//! Internal node groups: routing keys plus one child reference per node.

use crate::breadcrumb::SlotAddress;
use crate::node_group::{ChildRef, GroupGeometry, NodeGroup, Occupancy};

/// Internal (level >= 1) group.
///
/// Each node owns `node_size` routing slots and exactly one child group.
/// Routing slot `o` of a node holds the largest key of child node `o`; the
/// last routing slot also absorbs every child node past it. The last
/// populated slot of a node is therefore the high key of its whole child.
/// A `None` slot means the corresponding child node holds nothing yet.
///
/// Keys are written by the tree, never derived here from children.
pub struct InternalNodeGroup<K> {
    geometry: GroupGeometry,
    occupancy: Occupancy,
    level: usize,
    keys: Vec<Option<K>>,
    children: Vec<Option<ChildRef>>,
}

impl<K> NodeGroup for InternalNodeGroup<K> {
    #[inline]
    fn geometry(&self) -> GroupGeometry {
        self.geometry
    }

    #[inline]
    fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }

    #[inline]
    fn occupancy_mut(&mut self) -> &mut Occupancy {
        &mut self.occupancy
    }
}

impl<K> InternalNodeGroup<K> {
    /// Creates an empty internal group at `level` (1 = parent of leaves).
    pub fn new(geometry: GroupGeometry, level: usize) -> Self {
        assert!(level >= 1, "internal groups live at level 1 or above");
        Self {
            geometry,
            occupancy: Occupancy::new(geometry.capacity()),
            level,
            keys: (0..geometry.capacity()).map(|_| None).collect(),
            children: vec![None; geometry.num_nodes],
        }
    }

    /// Tree level of this group.
    #[inline]
    pub fn level(&self) -> usize {
        self.level
    }

    /// Child group referenced by `node`.
    #[inline]
    pub fn child_for_node(&self, node: usize) -> Option<ChildRef> {
        self.children[node]
    }

    /// Points `node` at `child`. The caller writes the node's routing keys.
    pub fn set_child_node_on_node(&mut self, node: usize, child: ChildRef) {
        self.children[node] = Some(child);
    }

    /// Routing key at `slot`.
    #[inline]
    pub fn key(&self, slot: SlotAddress) -> Option<&K> {
        self.keys[self.index_of(slot)].as_ref()
    }

    /// Writes a routing key. `None` tombstones the slot.
    pub fn put(&mut self, slot: SlotAddress, key: Option<K>) {
        let index = self.index_of(slot);
        if key.is_some() {
            self.occupancy.set(index);
        } else {
            self.occupancy.clear(index);
        }
        self.keys[index] = key;
    }

    /// Routing keys of `node`, in slot order.
    #[inline]
    pub fn node_keys(&self, node: usize) -> &[Option<K>] {
        &self.keys[self.geometry.node_range(node)]
    }

    /// High key of `node`: its last populated routing slot.
    pub fn high_key(&self, node: usize) -> Option<&K> {
        self.node_keys(node).iter().rev().find_map(Option::as_ref)
    }

    /// Returns true if `node` holds neither a child nor any routing key.
    pub fn is_node_empty(&self, node: usize) -> bool {
        self.children[node].is_none()
            && self.geometry.node_range(node).all(|i| !self.occupancy.is_set(i))
    }

    /// First node at or after `node` that is entirely empty.
    ///
    /// A node whose child is empty still counts as used. `None` means this
    /// group has no room and must be split before another child can be seated.
    pub fn find_node_index_of_empty_node_from(&self, node: usize) -> Option<usize> {
        (node..self.geometry.num_nodes).find(|&n| self.is_node_empty(n))
    }

    /// Last node that references a child.
    pub fn last_child_node(&self) -> Option<usize> {
        self.children.iter().rposition(Option::is_some)
    }

    /// Nodes that reference a child, with their child.
    pub fn children(&self) -> impl Iterator<Item = (usize, ChildRef)> + '_ {
        self.children
            .iter()
            .enumerate()
            .filter_map(|(node, child)| child.map(|c| (node, c)))
    }

    /// Moves node `src` (keys, occupancy, child) onto the empty node `dst`.
    fn move_node(&mut self, src: usize, dst: usize) {
        let node_size = self.geometry.node_size;
        for offset in 0..node_size {
            let from = src * node_size + offset;
            let to = dst * node_size + offset;
            if let Some(key) = self.keys[from].take() {
                self.occupancy.relocate(from, to);
                self.keys[to] = Some(key);
            }
        }
        self.children[dst] = self.children[src].take();
    }

    /// Shifts whole nodes `[from, to)` one node to the right, freeing `from`.
    /// Node `to` must be empty. No-op when `from == to`.
    pub fn shift_nodes_one_right(&mut self, from: usize, to: usize) {
        assert!(from <= to, "node shift from {from} past {to}");
        assert!(
            to < self.geometry.num_nodes,
            "node {to} outside group of {} nodes",
            self.geometry.num_nodes
        );
        assert!(self.is_node_empty(to), "node shift onto occupied node {to}");
        for node in (from..to).rev() {
            self.move_node(node, node + 1);
        }
    }

    /// Splits off nodes from `split_node()` onward, with their keys and
    /// children, into a new group at the same level. Moved nodes land at the
    /// front of the new group and are cleared here. Internal groups have no
    /// sibling links, so nothing else is relinked.
    pub fn split(&mut self) -> Self {
        let mut upper = Self::new(self.geometry, self.level);
        let first_node = self.geometry.split_node();
        let node_size = self.geometry.node_size;
        for node in first_node..self.geometry.num_nodes {
            let dst_node = node - first_node;
            for offset in 0..node_size {
                let index = node * node_size + offset;
                if let Some(key) = self.keys[index].take() {
                    self.occupancy.clear(index);
                    let dst = dst_node * node_size + offset;
                    upper.keys[dst] = Some(key);
                    upper.occupancy.set(dst);
                }
            }
            upper.children[dst_node] = self.children[node].take();
        }
        upper
    }
}

impl<K: Ord + Clone> InternalNodeGroup<K> {
    /// Rewrites every routing slot of `node`. Returns true if the node's
    /// high key changed, which is what the level above depends on.
    pub fn write_node_keys(&mut self, node: usize, keys: Vec<Option<K>>) -> bool {
        assert_eq!(
            keys.len(),
            self.geometry.node_size,
            "routing keys must cover the whole node"
        );
        let before = self.high_key(node).cloned();
        for (offset, key) in keys.into_iter().enumerate() {
            self.put(SlotAddress::new(node, offset), key);
        }
        before.as_ref() != self.high_key(node)
    }

    /// Picks the routing slot for `key`, scanning nodes from `start_node`.
    ///
    /// The node is the first child-bearing node whose high key is `>= key`,
    /// or the last child-bearing node when the key exceeds them all. Within
    /// it, the slot is the first populated one `>= key`, else the last
    /// populated one, else offset 0. The chosen offset is the node index at
    /// which the search continues inside the child group.
    pub fn route(&self, key: &K, start_node: usize) -> SlotAddress {
        let start = start_node.min(self.geometry.num_nodes - 1);
        let mut fallback = None;
        for node in start..self.geometry.num_nodes {
            if self.children[node].is_none() {
                continue;
            }
            fallback = Some(node);
            if matches!(self.high_key(node), Some(high) if high >= key) {
                return self.route_within(node, key);
            }
        }
        let node = fallback.or_else(|| self.last_child_node()).unwrap_or(0);
        self.route_within(node, key)
    }

    fn route_within(&self, node: usize, key: &K) -> SlotAddress {
        let mut last = None;
        for (offset, slot_key) in self.node_keys(node).iter().enumerate() {
            if let Some(slot_key) = slot_key {
                if slot_key >= key {
                    return SlotAddress::new(node, offset);
                }
                last = Some(offset);
            }
        }
        SlotAddress::new(node, last.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_group::{InternalGroupId, LeafGroupId};

    fn group() -> InternalNodeGroup<u32> {
        InternalNodeGroup::new(GroupGeometry::new(2, 4), 1)
    }

    fn seat(group: &mut InternalNodeGroup<u32>, node: usize, leaf: u32, keys: [Option<u32>; 2]) {
        group.set_child_node_on_node(node, ChildRef::Leaf(LeafGroupId(leaf)));
        group.write_node_keys(node, keys.to_vec());
    }

    #[test]
    fn test_child_for_node() {
        let mut g = group();
        assert_eq!(g.child_for_node(0), None);
        g.set_child_node_on_node(0, ChildRef::Leaf(LeafGroupId(3)));
        assert_eq!(g.child_for_node(0), Some(ChildRef::Leaf(LeafGroupId(3))));
        assert_eq!(g.last_child_node(), Some(0));
    }

    #[test]
    fn test_put_and_tombstone_key() {
        let mut g = group();
        g.put(SlotAddress::new(1, 1), Some(42));
        assert_eq!(g.key(SlotAddress::new(1, 1)), Some(&42));
        assert_eq!(g.empty_slots(), 7);
        g.put(SlotAddress::new(1, 1), None);
        assert_eq!(g.key(SlotAddress::new(1, 1)), None);
        assert_eq!(g.empty_slots(), 8);
    }

    #[test]
    fn test_high_key_is_last_populated_slot() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(5), None]);
        assert_eq!(g.high_key(0), Some(&5));
        assert!(g.write_node_keys(0, vec![Some(5), Some(9)]));
        assert_eq!(g.high_key(0), Some(&9));
        // Intermediate slot changes leave the high key alone.
        assert!(!g.write_node_keys(0, vec![Some(6), Some(9)]));
    }

    #[test]
    fn test_find_empty_node_skips_childbearing_nodes() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(3), Some(7)]);
        g.set_child_node_on_node(1, ChildRef::Leaf(LeafGroupId(1)));
        assert_eq!(g.find_node_index_of_empty_node_from(0), Some(2));
        assert_eq!(g.find_node_index_of_empty_node_from(3), Some(3));
        seat(&mut g, 2, 2, [Some(20), None]);
        seat(&mut g, 3, 3, [Some(30), None]);
        assert_eq!(g.find_node_index_of_empty_node_from(0), None);
    }

    #[test]
    fn test_shift_nodes_one_right() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(1), Some(2)]);
        seat(&mut g, 1, 1, [Some(3), Some(4)]);
        seat(&mut g, 2, 2, [Some(5), None]);

        g.shift_nodes_one_right(1, 3);
        assert!(g.is_node_empty(1));
        assert_eq!(g.child_for_node(2), Some(ChildRef::Leaf(LeafGroupId(1))));
        assert_eq!(g.child_for_node(3), Some(ChildRef::Leaf(LeafGroupId(2))));
        assert_eq!(g.node_keys(2), &[Some(3), Some(4)]);
        assert_eq!(g.node_keys(3), &[Some(5), None]);
        assert_eq!(g.empty_slots(), 3);
        assert_eq!(g.occupancy().count_clear(), 3);
    }

    #[test]
    #[should_panic(expected = "occupied node")]
    fn test_shift_onto_occupied_node_panics() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(1), None]);
        seat(&mut g, 1, 1, [Some(2), None]);
        g.shift_nodes_one_right(0, 1);
    }

    #[test]
    fn test_split_moves_keys_and_children() {
        let mut g = InternalNodeGroup::new(GroupGeometry::new(2, 3), 2);
        for node in 0..3 {
            g.set_child_node_on_node(node, ChildRef::Internal(InternalGroupId(node as u32)));
            g.write_node_keys(node, vec![Some(node as u32 * 10), Some(node as u32 * 10 + 5)]);
        }

        let upper = g.split();
        assert_eq!(upper.level(), 2);
        assert_eq!(g.last_child_node(), Some(1));
        assert!(g.is_node_empty(2));
        assert_eq!(upper.child_for_node(0), Some(ChildRef::Internal(InternalGroupId(2))));
        assert_eq!(upper.node_keys(0), &[Some(20), Some(25)]);
        assert!(upper.is_node_empty(1));
        assert_eq!(g.empty_slots(), 2);
        assert_eq!(upper.empty_slots(), 4);
    }

    #[test]
    fn test_route_picks_first_node_covering_key() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(2), Some(5)]);
        seat(&mut g, 1, 1, [Some(8), Some(12)]);

        assert_eq!(g.route(&1, 0), SlotAddress::new(0, 0));
        assert_eq!(g.route(&4, 0), SlotAddress::new(0, 1));
        assert_eq!(g.route(&5, 0), SlotAddress::new(0, 1));
        assert_eq!(g.route(&6, 0), SlotAddress::new(1, 0));
        assert_eq!(g.route(&10, 0), SlotAddress::new(1, 1));
        // Past every high key: last child-bearing node, last populated slot.
        assert_eq!(g.route(&99, 0), SlotAddress::new(1, 1));
        // A start hint skips earlier nodes.
        assert_eq!(g.route(&1, 1), SlotAddress::new(1, 0));
    }

    #[test]
    fn test_route_skips_empty_subtrees() {
        let mut g = group();
        seat(&mut g, 0, 0, [Some(3), None]);
        seat(&mut g, 1, 1, [None, None]);
        seat(&mut g, 2, 2, [Some(10), None]);
        assert_eq!(g.route(&5, 0), SlotAddress::new(2, 0));
        assert_eq!(g.route(&50, 0), SlotAddress::new(2, 0));
    }

    #[test]
    fn test_route_in_fresh_group() {
        let mut g = group();
        g.set_child_node_on_node(0, ChildRef::Leaf(LeafGroupId(0)));
        assert_eq!(g.route(&7, 0), SlotAddress::new(0, 0));
    }
}
