//! Shared geometry and occupancy bookkeeping for node groups.
//!
//! A node group is a fixed block of `num_nodes * node_size` slots. Slots are
//! addressed either absolutely (`0..capacity`) or as a [`SlotAddress`]
//! (node index, offset within node). One bit per slot records occupancy, and a
//! running counter of clear bits is kept alongside so capacity checks never
//! have to scan.

use std::ops::Range;

use crate::breadcrumb::SlotAddress;

/// Identifier of a leaf group inside the tree's leaf store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeafGroupId(pub u32);

impl std::fmt::Display for LeafGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "leaf:{}", self.0)
    }
}

/// Identifier of an internal group inside the tree's internal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalGroupId(pub u32);

impl std::fmt::Display for InternalGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "internal:{}", self.0)
    }
}

/// Child reference held by one node of an internal group.
///
/// Groups at level 1 point at leaf groups, higher levels at internal groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    Leaf(LeafGroupId),
    Internal(InternalGroupId),
}

impl std::fmt::Display for ChildRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildRef::Leaf(id) => id.fmt(f),
            ChildRef::Internal(id) => id.fmt(f),
        }
    }
}

/// Slot layout of a group: `num_nodes` nodes of `node_size` slots each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupGeometry {
    /// Slots per node.
    pub node_size: usize,
    /// Nodes per group.
    pub num_nodes: usize,
}

impl GroupGeometry {
    /// Creates a geometry. Both dimensions must be non-zero.
    pub fn new(node_size: usize, num_nodes: usize) -> Self {
        assert!(
            node_size > 0 && num_nodes > 0,
            "degenerate group geometry {num_nodes}x{node_size}"
        );
        Self {
            node_size,
            num_nodes,
        }
    }

    /// Total number of slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.node_size * self.num_nodes
    }

    /// Absolute slot range covered by `node`.
    #[inline]
    pub fn node_range(&self, node: usize) -> Range<usize> {
        let start = node * self.node_size;
        start..start + self.node_size
    }

    /// Node index at which a group of this geometry is split.
    /// Nodes from this index onward move to the new group.
    #[inline]
    pub fn split_node(&self) -> usize {
        self.num_nodes.div_ceil(2)
    }
}

/// Occupancy bit vector with a running empty-slot count.
///
/// Invariant: the number of clear bits in `0..len` equals `empty`.
#[derive(Debug, Clone)]
pub struct Occupancy {
    words: Vec<u64>,
    len: usize,
    empty: usize,
}

impl Occupancy {
    /// Creates an all-empty bit vector of `len` slots.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
            empty: len,
        }
    }

    /// Number of slots tracked.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no slots are tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Running count of clear bits.
    #[inline]
    pub fn empty_slots(&self) -> usize {
        self.empty
    }

    #[inline]
    fn check(&self, index: usize) {
        assert!(
            index < self.len,
            "slot {index} out of bounds for group of {} slots",
            self.len
        );
    }

    /// Returns true if the slot's bit is set.
    #[inline]
    pub fn is_set(&self, index: usize) -> bool {
        self.check(index);
        self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Sets the slot's bit. Returns true if it was previously clear.
    pub fn set(&mut self, index: usize) -> bool {
        if self.is_set(index) {
            return false;
        }
        self.words[index / 64] |= 1u64 << (index % 64);
        self.empty -= 1;
        true
    }

    /// Clears the slot's bit. Returns true if it was previously set.
    pub fn clear(&mut self, index: usize) -> bool {
        if !self.is_set(index) {
            return false;
        }
        self.words[index / 64] &= !(1u64 << (index % 64));
        self.empty += 1;
        true
    }

    /// Moves a set bit from `src` to a clear `dst` without touching the
    /// empty-slot counter. Used by shifts, which relocate rather than insert.
    pub fn relocate(&mut self, src: usize, dst: usize) {
        assert!(self.is_set(src), "relocating from empty slot {src}");
        assert!(!self.is_set(dst), "relocating onto occupied slot {dst}");
        self.words[src / 64] &= !(1u64 << (src % 64));
        self.words[dst / 64] |= 1u64 << (dst % 64);
    }

    /// First clear bit at or after `from`.
    pub fn first_clear_from(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word = from / 64;
        let mut bits = !self.words[word] & (u64::MAX << (from % 64));
        loop {
            if bits != 0 {
                let index = word * 64 + bits.trailing_zeros() as usize;
                // Padding bits past `len` read as clear.
                return (index < self.len).then_some(index);
            }
            word += 1;
            if word >= self.words.len() {
                return None;
            }
            bits = !self.words[word];
        }
    }

    /// Last clear bit at or before `at`.
    pub fn last_clear_at_or_before(&self, at: usize) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let at = at.min(self.len - 1);
        let mut word = at / 64;
        let mut bits = !self.words[word] & (u64::MAX >> (63 - at % 64));
        loop {
            if bits != 0 {
                return Some(word * 64 + 63 - bits.leading_zeros() as usize);
            }
            if word == 0 {
                return None;
            }
            word -= 1;
            bits = !self.words[word];
        }
    }

    /// Counts clear bits by scanning. Only used for invariant checks.
    pub fn count_clear(&self) -> usize {
        let set: usize = self.words.iter().map(|w| w.count_ones() as usize).sum();
        self.len - set
    }
}

/// Occupancy behavior shared by leaf and internal groups.
///
/// Ordering lives in the concrete groups: leaf groups compare on key and
/// value, internal groups on key alone.
pub trait NodeGroup {
    /// Slot layout of this group.
    fn geometry(&self) -> GroupGeometry;

    /// Occupancy bits of this group.
    fn occupancy(&self) -> &Occupancy;

    /// Mutable occupancy bits of this group.
    fn occupancy_mut(&mut self) -> &mut Occupancy;

    /// Total number of slots.
    #[inline]
    fn capacity(&self) -> usize {
        self.geometry().capacity()
    }

    /// Converts a slot address to an absolute index. Panics when the address
    /// lies outside this group.
    #[inline]
    fn index_of(&self, slot: SlotAddress) -> usize {
        let geometry = self.geometry();
        assert!(
            slot.node < geometry.num_nodes && slot.offset < geometry.node_size,
            "slot {slot} outside {}x{} group",
            geometry.num_nodes,
            geometry.node_size
        );
        slot.to_index(geometry.node_size)
    }

    /// Converts an absolute index to a slot address. Panics past capacity.
    #[inline]
    fn address_of(&self, index: usize) -> SlotAddress {
        assert!(
            index < self.capacity(),
            "slot {index} out of bounds for group of {} slots",
            self.capacity()
        );
        SlotAddress::from_index(index, self.geometry().node_size)
    }

    /// Marks a slot occupied.
    fn mark_full(&mut self, slot: SlotAddress) {
        let index = self.index_of(slot);
        self.occupancy_mut().set(index);
    }

    /// Marks a slot empty.
    fn mark_empty(&mut self, slot: SlotAddress) {
        let index = self.index_of(slot);
        self.occupancy_mut().clear(index);
    }

    /// Returns true if the slot is occupied.
    fn is_full(&self, slot: SlotAddress) -> bool {
        self.occupancy().is_set(self.index_of(slot))
    }

    /// Returns true if any slot is empty.
    #[inline]
    fn has_empty_slots(&self) -> bool {
        self.occupancy().empty_slots() > 0
    }

    /// Number of empty slots.
    #[inline]
    fn empty_slots(&self) -> usize {
        self.occupancy().empty_slots()
    }

    /// First empty slot at or after `slot`, or `SlotAddress::INVALID`.
    fn find_closest_empty_slot_from(&self, slot: SlotAddress) -> SlotAddress {
        if !slot.is_valid() {
            return SlotAddress::INVALID;
        }
        match self.occupancy().first_clear_from(self.index_of(slot)) {
            Some(index) => self.address_of(index),
            None => SlotAddress::INVALID,
        }
    }

    /// Last empty slot at or before `slot`, or `SlotAddress::INVALID`.
    fn find_closest_empty_slot_before(&self, slot: SlotAddress) -> SlotAddress {
        if !slot.is_valid() {
            return SlotAddress::INVALID;
        }
        match self.occupancy().last_clear_at_or_before(self.index_of(slot)) {
            Some(index) => self.address_of(index),
            None => SlotAddress::INVALID,
        }
    }

    /// The slot one position after `slot`, or `SlotAddress::INVALID` past the end.
    fn plus_one(&self, slot: SlotAddress) -> SlotAddress {
        if !slot.is_valid() {
            return SlotAddress::INVALID;
        }
        let next = self.index_of(slot) + 1;
        if next >= self.capacity() {
            SlotAddress::INVALID
        } else {
            self.address_of(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BareGroup {
        geometry: GroupGeometry,
        occupancy: Occupancy,
    }

    impl BareGroup {
        fn new(node_size: usize, num_nodes: usize) -> Self {
            let geometry = GroupGeometry::new(node_size, num_nodes);
            Self {
                geometry,
                occupancy: Occupancy::new(geometry.capacity()),
            }
        }
    }

    impl NodeGroup for BareGroup {
        fn geometry(&self) -> GroupGeometry {
            self.geometry
        }

        fn occupancy(&self) -> &Occupancy {
            &self.occupancy
        }

        fn occupancy_mut(&mut self) -> &mut Occupancy {
            &mut self.occupancy
        }
    }

    #[test]
    fn test_geometry_split_node_rounds_up() {
        assert_eq!(GroupGeometry::new(4, 3).split_node(), 2);
        assert_eq!(GroupGeometry::new(4, 4).split_node(), 2);
        assert_eq!(GroupGeometry::new(4, 2).split_node(), 1);
        assert_eq!(GroupGeometry::new(4, 5).node_range(2), 8..12);
    }

    #[test]
    #[should_panic(expected = "degenerate group geometry")]
    fn test_geometry_rejects_zero() {
        GroupGeometry::new(0, 4);
    }

    #[test]
    fn test_occupancy_counts_track_bits() {
        let mut bits = Occupancy::new(130);
        assert_eq!(bits.empty_slots(), 130);
        assert!(bits.set(0));
        assert!(bits.set(64));
        assert!(bits.set(129));
        assert!(!bits.set(129));
        assert_eq!(bits.empty_slots(), 127);
        assert!(bits.clear(64));
        assert!(!bits.clear(64));
        assert_eq!(bits.empty_slots(), 128);
        assert_eq!(bits.count_clear(), bits.empty_slots());
    }

    #[test]
    fn test_occupancy_relocate_keeps_counter() {
        let mut bits = Occupancy::new(8);
        bits.set(2);
        bits.relocate(2, 3);
        assert!(!bits.is_set(2));
        assert!(bits.is_set(3));
        assert_eq!(bits.empty_slots(), 7);
        assert_eq!(bits.count_clear(), 7);
    }

    #[test]
    fn test_occupancy_scans_across_words() {
        let mut bits = Occupancy::new(200);
        for i in 0..150 {
            bits.set(i);
        }
        assert_eq!(bits.first_clear_from(0), Some(150));
        assert_eq!(bits.first_clear_from(170), Some(170));
        assert_eq!(bits.first_clear_from(200), None);
        assert_eq!(bits.last_clear_at_or_before(149), None);
        assert_eq!(bits.last_clear_at_or_before(199), Some(199));

        bits.clear(70);
        assert_eq!(bits.first_clear_from(3), Some(70));
        assert_eq!(bits.last_clear_at_or_before(140), Some(70));
    }

    #[test]
    fn test_occupancy_ignores_padding_bits() {
        let mut bits = Occupancy::new(10);
        for i in 0..10 {
            bits.set(i);
        }
        assert_eq!(bits.first_clear_from(0), None);
        assert_eq!(bits.last_clear_at_or_before(9), None);
        assert_eq!(bits.count_clear(), 0);
    }

    #[test]
    fn test_find_closest_empty_slot_from() {
        let mut group = BareGroup::new(3, 3);
        for i in 0..4 {
            let slot = group.address_of(i);
            group.mark_full(slot);
        }
        assert_eq!(
            group.find_closest_empty_slot_from(SlotAddress::new(0, 1)),
            SlotAddress::new(1, 1)
        );
        for i in 4..9 {
            let slot = group.address_of(i);
            group.mark_full(slot);
        }
        assert!(!group.has_empty_slots());
        assert_eq!(
            group.find_closest_empty_slot_from(SlotAddress::new(0, 0)),
            SlotAddress::INVALID
        );
    }

    #[test]
    fn test_find_closest_empty_slot_before() {
        let mut group = BareGroup::new(3, 3);
        for i in 2..9 {
            let slot = group.address_of(i);
            group.mark_full(slot);
        }
        assert_eq!(
            group.find_closest_empty_slot_before(SlotAddress::new(2, 2)),
            SlotAddress::new(0, 1)
        );
        group.mark_full(SlotAddress::new(0, 0));
        group.mark_full(SlotAddress::new(0, 1));
        assert_eq!(
            group.find_closest_empty_slot_before(SlotAddress::new(2, 2)),
            SlotAddress::INVALID
        );
    }

    #[test]
    fn test_plus_one_wraps_to_invalid() {
        let group = BareGroup::new(3, 2);
        assert_eq!(group.plus_one(SlotAddress::new(0, 2)), SlotAddress::new(1, 0));
        assert_eq!(group.plus_one(SlotAddress::new(1, 2)), SlotAddress::INVALID);
        assert_eq!(group.plus_one(SlotAddress::INVALID), SlotAddress::INVALID);
    }

    #[test]
    #[should_panic(expected = "outside 2x3 group")]
    fn test_mark_full_out_of_bounds_panics() {
        let mut group = BareGroup::new(3, 2);
        group.mark_full(SlotAddress::new(2, 0));
    }

    #[test]
    fn test_child_ref_display() {
        assert_eq!(ChildRef::Leaf(LeafGroupId(4)).to_string(), "leaf:4");
        assert_eq!(
            ChildRef::Internal(InternalGroupId(9)).to_string(),
            "internal:9"
        );
    }
}
