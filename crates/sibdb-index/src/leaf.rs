//! Leaf node groups: sorted key/value slots chained to their siblings.

use std::cmp::Ordering;

use crate::breadcrumb::SlotAddress;
use crate::node_group::{GroupGeometry, LeafGroupId, NodeGroup, Occupancy};

/// A key/value pair stored in one leaf slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K: Ord, V: Ord> LeafEntry<K, V> {
    /// Leaf ordering: key first, value as tie-break among duplicates.
    #[inline]
    fn cmp_target(&self, key: &K, value: &V) -> Ordering {
        self.key.cmp(key).then_with(|| self.value.cmp(value))
    }
}

/// Where an insertion lands inside a leaf group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPlan {
    /// The slot is empty and already in sort position.
    Direct(SlotAddress),
    /// Shift `[at, empty)` one slot right, then write at `at`.
    ShiftRight { at: SlotAddress, empty: SlotAddress },
    /// Shift `(empty, at]` one slot left, then write at `at`.
    ShiftLeft { at: SlotAddress, empty: SlotAddress },
    /// No empty slot anywhere in the group; it must be split.
    Full,
}

/// Leaf level (level 0) group.
///
/// Occupied slots are kept in sort order but need not be contiguous:
/// tombstones leave holes that later shifts may reuse. Leaf groups form a
/// doubly linked chain in key order that is independent of routing.
pub struct LeafNodeGroup<K, V> {
    geometry: GroupGeometry,
    occupancy: Occupancy,
    entries: Vec<Option<LeafEntry<K, V>>>,
    previous: Option<LeafGroupId>,
    next: Option<LeafGroupId>,
}

impl<K, V> NodeGroup for LeafNodeGroup<K, V> {
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

impl<K, V> LeafNodeGroup<K, V> {
    /// Creates an empty, unlinked leaf group.
    pub fn new(geometry: GroupGeometry) -> Self {
        let capacity = geometry.capacity();
        Self {
            geometry,
            occupancy: Occupancy::new(capacity),
            entries: (0..capacity).map(|_| None).collect(),
            previous: None,
            next: None,
        }
    }

    /// Previous leaf group in key order.
    #[inline]
    pub fn previous(&self) -> Option<LeafGroupId> {
        self.previous
    }

    /// Next leaf group in key order.
    #[inline]
    pub fn next(&self) -> Option<LeafGroupId> {
        self.next
    }

    #[inline]
    pub fn set_previous(&mut self, previous: Option<LeafGroupId>) {
        self.previous = previous;
    }

    #[inline]
    pub fn set_next(&mut self, next: Option<LeafGroupId>) {
        self.next = next;
    }

    /// Entry stored at `slot`, if any.
    #[inline]
    pub fn get(&self, slot: SlotAddress) -> Option<&LeafEntry<K, V>> {
        self.entries[self.index_of(slot)].as_ref()
    }

    /// Entry stored at an absolute index. Indices past the end read as empty.
    #[inline]
    pub fn entry_at(&self, index: usize) -> Option<&LeafEntry<K, V>> {
        self.entries.get(index).and_then(Option::as_ref)
    }

    /// Writes `key`/`value` at `slot`, marking it occupied.
    pub fn put(&mut self, slot: SlotAddress, key: K, value: V) {
        let index = self.index_of(slot);
        self.entries[index] = Some(LeafEntry { key, value });
        self.occupancy.set(index);
    }

    /// Clears `slot` and marks it empty. The slot keeps its position; nothing
    /// is compacted around it.
    pub fn tombstone(&mut self, slot: SlotAddress) -> Option<LeafEntry<K, V>> {
        let index = self.index_of(slot);
        let old = self.entries[index].take();
        self.occupancy.clear(index);
        old
    }

    /// Moves an entry between slots without changing the empty-slot count.
    fn relocate(&mut self, src: usize, dst: usize) {
        self.occupancy.relocate(src, dst);
        self.entries[dst] = self.entries[src].take();
    }

    /// Shifts every slot in `[from, to)` one position right, leaving `from`
    /// free. `to` must be empty and every slot before it occupied. No-op when
    /// `from == to`.
    pub fn maybe_shift_one_right(&mut self, from: SlotAddress, to: SlotAddress) {
        let (from, to) = (self.index_of(from), self.index_of(to));
        assert!(from <= to, "right shift from {from} past {to}");
        for index in (from..to).rev() {
            self.relocate(index, index + 1);
        }
    }

    /// Shifts every slot in `(empty, to]` one position left, leaving `to`
    /// free. No-op when `empty == to`.
    pub fn maybe_shift_one_left(&mut self, empty: SlotAddress, to: SlotAddress) {
        let (empty, to) = (self.index_of(empty), self.index_of(to));
        assert!(empty <= to, "left shift from {to} past {empty}");
        for index in empty + 1..=to {
            self.relocate(index, index - 1);
        }
    }

    /// Number of occupied slots.
    #[inline]
    pub fn live_entries(&self) -> usize {
        self.capacity() - self.occupancy.empty_slots()
    }

    /// Largest key stored in `node`.
    pub fn node_max(&self, node: usize) -> Option<&K> {
        self.entries[self.geometry.node_range(node)]
            .iter()
            .rev()
            .find_map(|e| e.as_ref().map(|e| &e.key))
    }

    /// Largest key stored in the group.
    pub fn max_key(&self) -> Option<&K> {
        self.entries
            .iter()
            .rev()
            .find_map(|e| e.as_ref().map(|e| &e.key))
    }

    /// Occupied entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &LeafEntry<K, V>> {
        self.entries.iter().filter_map(Option::as_ref)
    }

    /// Splits off the upper half of this group's nodes into a new group.
    ///
    /// Nodes from `split_node()` onward move, in order, to the front of the
    /// new group and are cleared here. The new group is linked
    /// `self <-> new <-> old next`; the caller owns `self_id`'s store and must
    /// point `self.next` and the old next group's `previous` at the new group
    /// once it has an id.
    pub fn split(&mut self, self_id: LeafGroupId) -> Self {
        let mut upper = Self::new(self.geometry);
        let first = self.geometry.split_node() * self.geometry.node_size;
        for index in first..self.capacity() {
            if let Some(entry) = self.entries[index].take() {
                self.occupancy.clear(index);
                let dst = index - first;
                upper.entries[dst] = Some(entry);
                upper.occupancy.set(dst);
            }
        }
        upper.previous = Some(self_id);
        upper.next = self.next;
        upper
    }
}

impl<K: Ord, V: Ord> LeafNodeGroup<K, V> {
    /// First occupied slot at or after `start_node` whose key is `>= key`.
    pub fn lower_bound(&self, start_node: usize, key: &K) -> Option<usize> {
        let start = self.node_start(start_node);
        (start..self.capacity())
            .find(|&index| matches!(&self.entries[index], Some(e) if &e.key >= key))
    }

    #[inline]
    fn node_start(&self, node: usize) -> usize {
        node.min(self.geometry.num_nodes - 1) * self.geometry.node_size
    }

    /// Decides where `key`/`value` goes, scanning from `start_node`.
    ///
    /// Every entry before `start_node` must already order below the key.
    /// The entry lands after all smaller entries and before all entries
    /// `>=` it. If that gap holds no empty slot, the nearest empty slot after
    /// it is pulled in by a right shift, or failing that the nearest one
    /// before it by a left shift.
    pub fn plan_insert(&self, start_node: usize, key: &K, value: &V) -> InsertPlan {
        let capacity = self.capacity();
        let hi = (self.node_start(start_node)..capacity)
            .find(|&index| {
                matches!(&self.entries[index], Some(e) if e.cmp_target(key, value) != Ordering::Less)
            })
            .unwrap_or(capacity);
        let lo = (0..hi).rev().find(|&index| self.entries[index].is_some());

        let gap = lo.map_or(0, |lo| lo + 1);
        if gap < hi {
            return InsertPlan::Direct(self.address_of(gap));
        }

        if hi < capacity {
            let at = self.address_of(hi);
            let empty = self.find_closest_empty_slot_from(at);
            if empty.is_valid() {
                return InsertPlan::ShiftRight { at, empty };
            }
        }

        if let Some(lo) = lo {
            let at = self.address_of(lo);
            let empty = self.find_closest_empty_slot_before(at);
            if empty.is_valid() {
                return InsertPlan::ShiftLeft { at, empty };
            }
        }

        InsertPlan::Full
    }

    /// Carries out a plan from `plan_insert` and returns the written slot.
    pub fn apply_insert(&mut self, plan: InsertPlan, key: K, value: V) -> SlotAddress {
        let at = match plan {
            InsertPlan::Direct(at) => at,
            InsertPlan::ShiftRight { at, empty } => {
                self.maybe_shift_one_right(at, empty);
                at
            }
            InsertPlan::ShiftLeft { at, empty } => {
                self.maybe_shift_one_left(empty, at);
                at
            }
            InsertPlan::Full => panic!("insert applied to a full leaf group"),
        };
        self.put(at, key, value);
        at
    }
}
