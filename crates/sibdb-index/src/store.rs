//! In-memory storage for node groups.

/// In-memory group storage.
///
/// Groups live in a Vec and their ids are Vec indices. Groups are never freed:
/// a group whose slots have all been tombstoned stays allocated and linked.
pub struct GroupStore<T> {
    /// Groups stored by id (index = id).
    groups: Vec<T>,
}

impl<T> GroupStore<T> {
    /// Creates a new empty group store.
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    /// Stores a fully built group and returns its id.
    #[inline]
    pub fn allocate(&mut self, group: T) -> u32 {
        let id = self.groups.len() as u32;
        self.groups.push(group);
        id
    }

    /// Gets a group by id. Ids are only minted by `allocate`.
    #[inline]
    pub fn get(&self, id: u32) -> &T {
        &self.groups[id as usize]
    }

    /// Gets a mutable group by id.
    #[inline]
    pub fn get_mut(&mut self, id: u32) -> &mut T {
        &mut self.groups[id as usize]
    }

    /// Number of groups allocated.
    #[inline]
    pub fn len(&self) -> usize {
        self.groups.len()
    }
}

impl<T> Default for GroupStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_assigns_sequential_ids() {
        let mut store = GroupStore::new();
        assert_eq!(store.allocate("a"), 0);
        assert_eq!(store.allocate("b"), 1);
        assert_eq!(store.len(), 2);
        assert_eq!(*store.get(1), "b");
    }
}
