//! Node-group B+ tree: descent, insertion, splits, and high-key propagation.
//!
//! ## Shape
//!
//! ```text
//!   root (level h-1)      [n0: k k | n1: k k]        internal groups
//!                            |         |
//!   level 1               [n0 | n1]  [n0 | n1]       one child per node
//!                          |     |    |
//!   level 0          leaf <-> leaf <-> leaf <-> ...  sibling chain
//! ```
//!
//! Every mutation descends from the root, leaving one [`Breadcrumb`] per
//! internal level. The trail is then walked back up to refresh routing keys
//! (stopping at the first node whose high key did not move) or, when the leaf
//! group is full, to seat split-off groups in their parents. A split makes the
//! trail stale, so the insert restarts from the root.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use sibdb_common::{IndexConfig, Result, SibDbError};
use tracing::{debug, info, trace};

use crate::breadcrumb::Breadcrumb;
use crate::constants::MIN_HEIGHT;
use crate::internal::InternalNodeGroup;
use crate::leaf::{InsertPlan, LeafEntry, LeafNodeGroup};
use crate::node_group::{ChildRef, GroupGeometry, InternalGroupId, LeafGroupId, NodeGroup};
use crate::store::GroupStore;

/// Shape and split counters of a tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of levels, leaves included.
    pub height: usize,
    /// Leaf groups allocated.
    pub leaf_groups: usize,
    /// Internal groups allocated, root included.
    pub internal_groups: usize,
    /// Entries not tombstoned.
    pub live_entries: usize,
    /// Leaf group splits performed.
    pub leaf_splits: u64,
    /// Internal group splits performed.
    pub internal_splits: u64,
}

/// Result of a root-to-leaf descent.
struct Descent {
    trail: Vec<Breadcrumb>,
    leaf: LeafGroupId,
    /// Node of the leaf group at which the scan starts.
    start_node: usize,
}

/// Single-owner node-group B+ tree mapping keys to sets of values.
///
/// Duplicate keys are stored one slot per `put`; `get` collapses them into a
/// set. Deletion tombstones slots in place. Mutations take `&mut self`; see
/// [`SiblingIndex`](crate::SiblingIndex) for the shared, locked form.
pub struct NodeGroupTree<K, V> {
    config: IndexConfig,
    leaf_geometry: GroupGeometry,
    internal_geometry: GroupGeometry,
    leaves: GroupStore<LeafNodeGroup<K, V>>,
    internals: GroupStore<InternalNodeGroup<K>>,
    root: InternalGroupId,
    /// Head of the sibling chain. Splits only add groups to the right of an
    /// existing group, so the first leaf never changes.
    first_leaf: LeafGroupId,
    len: usize,
    leaf_splits: u64,
    internal_splits: u64,
}

impl<K: Ord + Clone, V: Ord + Clone> NodeGroupTree<K, V> {
    /// Builds an empty three-level tree: root, one intermediate group, one leaf.
    pub fn new(config: IndexConfig) -> Result<Self> {
        config.validate()?;

        let leaf_geometry = GroupGeometry::new(config.leaf_node_size, config.nodes_per_leaf_group);
        let internal_geometry = GroupGeometry::new(
            config.internal_node_size(),
            config.nodes_per_internal_group(),
        );

        let mut leaves = GroupStore::new();
        let mut internals = GroupStore::new();

        let leaf = LeafGroupId(leaves.allocate(LeafNodeGroup::new(leaf_geometry)));

        let mut intermediate = InternalNodeGroup::new(internal_geometry, 1);
        intermediate.set_child_node_on_node(0, ChildRef::Leaf(leaf));
        let intermediate = InternalGroupId(internals.allocate(intermediate));

        let mut root = InternalNodeGroup::new(internal_geometry, MIN_HEIGHT - 1);
        root.set_child_node_on_node(0, ChildRef::Internal(intermediate));
        let root = InternalGroupId(internals.allocate(root));

        info!(
            leaf_node_size = config.leaf_node_size,
            nodes_per_leaf_group = config.nodes_per_leaf_group,
            internal_node_size = internal_geometry.node_size,
            nodes_per_internal_group = internal_geometry.num_nodes,
            "created node group tree"
        );

        Ok(Self {
            config,
            leaf_geometry,
            internal_geometry,
            leaves,
            internals,
            root,
            first_leaf: leaf,
            len: 0,
            leaf_splits: 0,
            internal_splits: 0,
        })
    }

    #[inline]
    fn leaf(&self, id: LeafGroupId) -> &LeafNodeGroup<K, V> {
        self.leaves.get(id.0)
    }

    #[inline]
    fn leaf_mut(&mut self, id: LeafGroupId) -> &mut LeafNodeGroup<K, V> {
        self.leaves.get_mut(id.0)
    }

    #[inline]
    fn internal(&self, id: InternalGroupId) -> &InternalNodeGroup<K> {
        self.internals.get(id.0)
    }

    #[inline]
    fn internal_mut(&mut self, id: InternalGroupId) -> &mut InternalNodeGroup<K> {
        self.internals.get_mut(id.0)
    }

    /// Geometry this tree was built with.
    pub fn config(&self) -> IndexConfig {
        self.config
    }

    /// Number of levels, leaves included.
    #[inline]
    pub fn height(&self) -> usize {
        self.internal(self.root).level() + 1
    }

    /// Number of live (non-tombstoned) entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no live entries remain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shape and split counters.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            height: self.height(),
            leaf_groups: self.leaves.len(),
            internal_groups: self.internals.len(),
            live_entries: self.len,
            leaf_splits: self.leaf_splits,
            internal_splits: self.internal_splits,
        }
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Walks from the root to the leaf group that holds, or would hold, `key`.
    ///
    /// At each level the routing slot's offset becomes the node index where
    /// the scan of the child group starts.
    fn descend(&self, key: &K) -> Descent {
        let mut trail = Vec::with_capacity(self.height());
        let mut group = self.root;
        let mut start_node = 0;
        loop {
            let internal = self.internal(group);
            let slot = internal.route(key, start_node);
            trail.push(Breadcrumb::new(group, slot));
            start_node = slot.offset;
            match internal.child_for_node(slot.node) {
                Some(ChildRef::Internal(child)) => group = child,
                Some(ChildRef::Leaf(leaf)) => {
                    trace!(%leaf, depth = trail.len(), start_node, "descent reached leaf group");
                    return Descent {
                        trail,
                        leaf,
                        start_node,
                    };
                }
                None => panic!("{group} routed to childless node {}", slot.node),
            }
        }
    }

    /// Visits occupied entries in key order starting at the descent point for
    /// `key`, following sibling links, until `visit` returns false.
    fn scan_from<F>(&self, key: &K, mut visit: F)
    where
        F: FnMut(&LeafEntry<K, V>) -> bool,
    {
        let Descent {
            leaf, start_node, ..
        } = self.descend(key);
        let mut group = Some(leaf);
        let mut from = start_node * self.leaf_geometry.node_size;
        while let Some(id) = group {
            let leaf = self.leaf(id);
            for index in from..leaf.capacity() {
                if let Some(entry) = leaf.entry_at(index) {
                    if !visit(entry) {
                        return;
                    }
                }
            }
            group = leaf.next();
            from = 0;
        }
    }

    // =========================================================================
    // Read Path
    // =========================================================================

    /// All distinct values stored under `key`. Empty when the key is absent.
    pub fn get(&self, key: &K) -> BTreeSet<V> {
        let mut values = BTreeSet::new();
        self.scan_from(key, |entry| match entry.key.cmp(key) {
            Ordering::Less => true,
            Ordering::Equal => {
                values.insert(entry.value.clone());
                true
            }
            Ordering::Greater => false,
        });
        values
    }

    /// Returns true if at least one entry is stored under `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        let mut found = false;
        self.scan_from(key, |entry| match entry.key.cmp(key) {
            Ordering::Less => true,
            Ordering::Equal => {
                found = true;
                false
            }
            Ordering::Greater => false,
        });
        found
    }

    /// Entries with `lo <= key <= hi`, in key order.
    pub fn range(&self, lo: &K, hi: &K) -> Vec<(K, V)> {
        let mut out = Vec::new();
        if lo > hi {
            return out;
        }
        self.scan_from(lo, |entry| {
            if &entry.key < lo {
                true
            } else if &entry.key <= hi {
                out.push((entry.key.clone(), entry.value.clone()));
                true
            } else {
                false
            }
        });
        out
    }

    /// Iterates every live entry in key order along the sibling chain.
    pub fn iter(&self) -> Entries<'_, K, V> {
        Entries {
            tree: self,
            group: Some(self.first_leaf),
            index: 0,
        }
    }

    // =========================================================================
    // Write Path
    // =========================================================================

    /// Inserts `value` under `key`. Duplicate keys are kept side by side.
    ///
    /// When the target leaf group is full it is split, the split is carried up
    /// the breadcrumb trail, and the insert restarts from the root. Inserts
    /// never fail; the tree grows as tall as the insert order demands.
    pub fn put(&mut self, key: K, value: V) {
        loop {
            let Descent {
                trail,
                leaf,
                start_node,
            } = self.descend(&key);
            match self.leaf(leaf).plan_insert(start_node, &key, &value) {
                InsertPlan::Full => self.split_leaf_chain(&trail, leaf),
                plan => {
                    let slot = self.leaf_mut(leaf).apply_insert(plan, key, value);
                    trace!(%leaf, %slot, "inserted entry");
                    self.len += 1;
                    self.propagate_high_keys(&trail);
                    return;
                }
            }
        }
    }

    /// Tombstones every entry stored under `key` and returns how many there
    /// were. Deleting an absent key is a no-op.
    ///
    /// Tombstoned slots stay in place and keep counting as empty capacity; a
    /// run of duplicates spanning several leaf groups is removed one group
    /// per descent.
    pub fn delete(&mut self, key: &K) -> usize {
        let mut removed = 0;
        loop {
            let Descent {
                trail,
                leaf,
                start_node,
            } = self.descend(key);
            let group = self.leaf_mut(leaf);
            let Some(first) = group.lower_bound(start_node, key) else {
                break;
            };

            let mut tombstoned = 0;
            let mut run_reaches_end = true;
            for index in first..group.capacity() {
                let slot = group.address_of(index);
                let is_match = match group.get(slot) {
                    None => continue,
                    Some(entry) => &entry.key == key,
                };
                if !is_match {
                    run_reaches_end = false;
                    break;
                }
                group.tombstone(slot);
                tombstoned += 1;
            }

            if tombstoned == 0 {
                break;
            }
            trace!(%leaf, tombstoned, "tombstoned key run");
            removed += tombstoned;
            self.len -= tombstoned;
            self.propagate_high_keys(&trail);
            if !run_reaches_end {
                break;
            }
        }
        removed
    }

    // =========================================================================
    // High-Key Propagation
    // =========================================================================

    /// Refreshes routing keys bottom-up along `trail`, stopping at the first
    /// node whose high key is unchanged.
    fn propagate_high_keys(&mut self, trail: &[Breadcrumb]) {
        for crumb in trail.iter().rev() {
            if !self.refresh_routing(crumb.group, crumb.slot.node) {
                break;
            }
        }
    }

    /// Recomputes every routing slot of `node` from its child's node maxima.
    /// Returns true if the node's high key changed.
    fn refresh_routing(&mut self, group: InternalGroupId, node: usize) -> bool {
        let Some(child) = self.internal(group).child_for_node(node) else {
            panic!("refreshing routing keys of childless node {node} in {group}");
        };
        let keys = self.routing_keys_for(child);
        self.internal_mut(group).write_node_keys(node, keys)
    }

    /// Routing slots a parent node must hold for `child`: slot `o` is the
    /// maximum of child node `o`, the last slot the maximum of the rest.
    fn routing_keys_for(&self, child: ChildRef) -> Vec<Option<K>> {
        let width = self.internal_geometry.node_size;
        let mut keys = vec![None; width];
        // Child nodes are in key order, so the last populated one wins a slot.
        let mut fold = |child_node: usize, max: Option<&K>| {
            if let Some(max) = max {
                keys[child_node.min(width - 1)] = Some(max.clone());
            }
        };
        match child {
            ChildRef::Leaf(id) => {
                let leaf = self.leaf(id);
                for node in 0..self.leaf_geometry.num_nodes {
                    fold(node, leaf.node_max(node));
                }
            }
            ChildRef::Internal(id) => {
                let internal = self.internal(id);
                for node in 0..self.internal_geometry.num_nodes {
                    fold(node, internal.high_key(node));
                }
            }
        }
        keys
    }

    // =========================================================================
    // Splits
    // =========================================================================

    /// Splits a full leaf group and seats the new group in its parent,
    /// splitting parents in turn while they have no free node, and growing a
    /// new root if the cascade gets that far.
    ///
    /// New groups are fully populated before anything visible points at
    /// them.
    fn split_leaf_chain(&mut self, trail: &[Breadcrumb], leaf: LeafGroupId) {
        let mut orphan = ChildRef::Leaf(self.split_leaf(leaf));
        for depth in (0..trail.len()).rev() {
            let Breadcrumb { group, slot } = trail[depth];

            if let Some(free) = self
                .internal(group)
                .find_node_index_of_empty_node_from(slot.node + 1)
            {
                self.seat_child(group, slot.node, free, orphan);
                // The group's node layout moved; its parent must re-map it.
                self.propagate_high_keys(&trail[..depth]);
                return;
            }

            let upper = self.split_internal(group);
            let split_node = self.internal_geometry.split_node();
            let (target, node) = if slot.node < split_node {
                (group, slot.node)
            } else {
                (upper, slot.node - split_node)
            };
            let Some(free) = self
                .internal(target)
                .find_node_index_of_empty_node_from(node + 1)
            else {
                panic!("{target} has no free node after splitting {group}");
            };
            self.seat_child(target, node, free, orphan);
            orphan = ChildRef::Internal(upper);
        }

        self.grow_root(orphan);
    }

    /// Seats `child` right after `node`, shifting nodes `[node + 1, free)`
    /// one to the right, and refreshes both affected nodes.
    fn seat_child(&mut self, group: InternalGroupId, node: usize, free: usize, child: ChildRef) {
        let internal = self.internal_mut(group);
        internal.shift_nodes_one_right(node + 1, free);
        internal.set_child_node_on_node(node + 1, child);
        self.refresh_routing(group, node);
        self.refresh_routing(group, node + 1);
    }

    /// Splits a leaf group and links the new group into the sibling chain.
    fn split_leaf(&mut self, id: LeafGroupId) -> LeafGroupId {
        let upper = self.leaf_mut(id).split(id);
        let old_next = upper.next();
        let upper_id = LeafGroupId(self.leaves.allocate(upper));

        self.leaf_mut(id).set_next(Some(upper_id));
        if let Some(next) = old_next {
            self.leaf_mut(next).set_previous(Some(upper_id));
        }

        self.leaf_splits += 1;
        debug!(leaf = %id, new_leaf = %upper_id, "split leaf group");
        upper_id
    }

    /// Splits an internal group. The new group is not yet seated anywhere.
    fn split_internal(&mut self, id: InternalGroupId) -> InternalGroupId {
        let upper = self.internal_mut(id).split();
        let level = upper.level();
        let upper_id = InternalGroupId(self.internals.allocate(upper));

        self.internal_splits += 1;
        debug!(group = %id, new_group = %upper_id, level, "split internal group");
        upper_id
    }

    /// Replaces the root with a fresh two-child root one level higher.
    fn grow_root(&mut self, orphan: ChildRef) {
        let old_root = self.root;
        let level = self.internal(old_root).level() + 1;

        let mut root = InternalNodeGroup::new(self.internal_geometry, level);
        root.set_child_node_on_node(0, ChildRef::Internal(old_root));
        root.set_child_node_on_node(1, orphan);
        let root_id = InternalGroupId(self.internals.allocate(root));
        self.refresh_routing(root_id, 0);
        self.refresh_routing(root_id, 1);

        self.root = root_id;
        debug!(root = %root_id, height = level + 1, "grew new root");
    }

    // =========================================================================
    // Invariant Checks
    // =========================================================================

    /// Verifies the whole tree.
    ///
    /// Checks occupancy bookkeeping of every group, that every routing slot
    /// matches its child, that levels line up, that every group is reachable
    /// exactly once, that the sibling chain is doubly linked and in key order,
    /// and that the live-entry count matches. Routing slots are checked level
    /// by level against the node maxima one level down, so together they pin
    /// every high key to its subtree maximum.
    ///
    /// The walk keeps its own stack; tall trees do not recurse.
    pub fn check_invariants(&self) -> Result<()> {
        if self.height() < MIN_HEIGHT {
            return Err(SibDbError::corrupted(format!(
                "height {} below minimum {MIN_HEIGHT}",
                self.height()
            )));
        }

        let mut live = 0;
        let mut seen_internals = vec![false; self.internals.len()];
        let mut seen_leaves = vec![false; self.leaves.len()];
        let mut pending = vec![self.root];
        while let Some(id) = pending.pop() {
            if std::mem::replace(&mut seen_internals[id.0 as usize], true) {
                return Err(SibDbError::corrupted(format!("{id} is reachable twice")));
            }
            for child in self.check_internal(id)? {
                match child {
                    ChildRef::Internal(child_id) => pending.push(child_id),
                    ChildRef::Leaf(leaf) => {
                        if std::mem::replace(&mut seen_leaves[leaf.0 as usize], true) {
                            return Err(SibDbError::corrupted(format!(
                                "{leaf} is reachable twice"
                            )));
                        }
                        live += self.check_leaf(leaf)?;
                    }
                }
            }
        }

        if let Some(orphan) = seen_internals.iter().position(|seen| !seen) {
            return Err(SibDbError::corrupted(format!(
                "{} is not reachable from the root",
                InternalGroupId(orphan as u32)
            )));
        }
        if live != self.len {
            return Err(SibDbError::corrupted(format!(
                "{live} reachable entries but {} counted",
                self.len
            )));
        }
        self.check_leaf_chain()
    }

    fn check_occupancy<G: NodeGroup>(group: &G, name: &dyn std::fmt::Display) -> Result<()> {
        let occupancy = group.occupancy();
        if occupancy.count_clear() != occupancy.empty_slots() {
            return Err(SibDbError::corrupted(format!(
                "{name}: {} clear bits but empty count {}",
                occupancy.count_clear(),
                occupancy.empty_slots()
            )));
        }
        Ok(())
    }

    /// Checks one internal group and returns its children.
    fn check_internal(&self, id: InternalGroupId) -> Result<Vec<ChildRef>> {
        let group = self.internal(id);
        Self::check_occupancy(group, &id)?;
        for index in 0..group.capacity() {
            let slot = group.address_of(index);
            if group.is_full(slot) != group.key(slot).is_some() {
                return Err(SibDbError::corrupted(format!(
                    "{id}: occupancy bit of slot {slot} disagrees with its key"
                )));
            }
        }
        for node in 0..self.internal_geometry.num_nodes {
            if group.child_for_node(node).is_none() && !group.is_node_empty(node) {
                return Err(SibDbError::corrupted(format!(
                    "{id}: node {node} has routing keys but no child"
                )));
            }
        }

        let mut children = Vec::with_capacity(self.internal_geometry.num_nodes);
        for (node, child) in group.children() {
            let child_level = match child {
                ChildRef::Leaf(_) => 0,
                ChildRef::Internal(child_id) => self.internal(child_id).level(),
            };
            if child_level + 1 != group.level() {
                return Err(SibDbError::corrupted(format!(
                    "{id} at level {} points at {child} at level {child_level}",
                    group.level()
                )));
            }
            if group.node_keys(node) != self.routing_keys_for(child).as_slice() {
                return Err(SibDbError::corrupted(format!(
                    "{id}: routing slots of node {node} are stale for {child}"
                )));
            }
            children.push(child);
        }
        Ok(children)
    }

    /// Checks one leaf group and returns its live entry count.
    fn check_leaf(&self, id: LeafGroupId) -> Result<usize> {
        let leaf = self.leaf(id);
        Self::check_occupancy(leaf, &id)?;
        for index in 0..leaf.capacity() {
            let slot = leaf.address_of(index);
            if leaf.is_full(slot) != leaf.get(slot).is_some() {
                return Err(SibDbError::corrupted(format!(
                    "{id}: occupancy bit of slot {slot} disagrees with its entry"
                )));
            }
        }
        Ok(leaf.live_entries())
    }

    fn check_leaf_chain(&self) -> Result<()> {
        if self.leaf(self.first_leaf).previous().is_some() {
            return Err(SibDbError::corrupted(format!(
                "{} heads the chain but has a previous group",
                self.first_leaf
            )));
        }

        let mut visited = 0;
        let mut last_key: Option<&K> = None;
        let mut current = Some(self.first_leaf);
        while let Some(id) = current {
            visited += 1;
            if visited > self.leaves.len() {
                return Err(SibDbError::corrupted("sibling chain has a cycle"));
            }
            let leaf = self.leaf(id);
            for entry in leaf.iter() {
                if matches!(last_key, Some(last) if last > &entry.key) {
                    return Err(SibDbError::corrupted(format!(
                        "{id}: keys out of order along the sibling chain"
                    )));
                }
                last_key = Some(&entry.key);
            }
            if let Some(next) = leaf.next() {
                if self.leaf(next).previous() != Some(id) {
                    return Err(SibDbError::corrupted(format!(
                        "{next} does not link back to {id}"
                    )));
                }
            }
            current = leaf.next();
        }

        if visited != self.leaves.len() {
            return Err(SibDbError::corrupted(format!(
                "sibling chain reaches {visited} of {} leaf groups",
                self.leaves.len()
            )));
        }
        Ok(())
    }
}

/// Iterator over live entries in key order.
pub struct Entries<'a, K, V> {
    tree: &'a NodeGroupTree<K, V>,
    group: Option<LeafGroupId>,
    index: usize,
}

impl<'a, K: Ord + Clone, V: Ord + Clone> Iterator for Entries<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        while let Some(id) = self.group {
            let leaf = tree.leaf(id);
            while self.index < leaf.capacity() {
                let index = self.index;
                self.index += 1;
                if let Some(entry) = leaf.entry_at(index) {
                    return Some((&entry.key, &entry.value));
                }
            }
            self.group = leaf.next();
            self.index = 0;
        }
        None
    }
}
