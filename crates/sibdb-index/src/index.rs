//! Shared, thread-safe handle over a node-group tree.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use sibdb_common::{IndexConfig, Result};

use crate::tree::{IndexStats, NodeGroupTree};

/// Node-grouped, sibling-linked order-preserving index.
///
/// Mutations hold the write lock for the whole tree, so only one runs at a
/// time. Reads hold the read lock and always see a tree with every split
/// fully seated.
pub struct SiblingIndex<K, V> {
    tree: RwLock<NodeGroupTree<K, V>>,
}

impl<K: Ord + Clone, V: Ord + Clone> SiblingIndex<K, V> {
    /// Creates an empty index with the given leaf geometry.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Ok(Self {
            tree: RwLock::new(NodeGroupTree::new(config)?),
        })
    }

    /// Creates an empty index with the default geometry.
    pub fn with_defaults() -> Result<Self> {
        Self::new(IndexConfig::default())
    }

    /// Inserts `value` under `key`.
    pub fn insert(&self, key: K, value: V) {
        self.tree.write().put(key, value);
    }

    /// All distinct values stored under `key`.
    pub fn lookup(&self, key: &K) -> BTreeSet<V> {
        self.tree.read().get(key)
    }

    /// Returns true if at least one entry is stored under `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.read().contains_key(key)
    }

    /// Removes every entry stored under `key`, returning how many there were.
    pub fn delete(&self, key: &K) -> usize {
        self.tree.write().delete(key)
    }

    /// Entries with `lo <= key <= hi`, in key order.
    pub fn range(&self, lo: &K, hi: &K) -> Vec<(K, V)> {
        self.tree.read().range(lo, hi)
    }

    /// Snapshot of every live entry in key order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.tree.read().len()
    }

    /// Returns true if no live entries remain.
    pub fn is_empty(&self) -> bool {
        self.tree.read().is_empty()
    }

    /// Number of levels, leaves included.
    pub fn height(&self) -> usize {
        self.tree.read().height()
    }

    /// Shape and split counters.
    pub fn stats(&self) -> IndexStats {
        self.tree.read().stats()
    }

    /// Geometry the index was built with.
    pub fn config(&self) -> IndexConfig {
        self.tree.read().config()
    }

    /// Verifies every structural invariant under the read lock.
    pub fn check_invariants(&self) -> Result<()> {
        self.tree.read().check_invariants()
    }

    /// Consumes the handle and returns the tree.
    pub fn into_inner(self) -> NodeGroupTree<K, V> {
        self.tree.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn index() -> SiblingIndex<u64, u64> {
        SiblingIndex::new(IndexConfig::new(4, 4)).unwrap()
    }

    #[test]
    fn test_insert_lookup_delete() {
        let index = index();
        index.insert(10, 1);
        index.insert(10, 2);
        index.insert(11, 3);

        assert_eq!(index.lookup(&10), BTreeSet::from([1, 2]));
        assert!(index.contains_key(&11));
        assert!(!index.contains_key(&12));
        assert_eq!(index.len(), 3);

        assert_eq!(index.delete(&10), 2);
        assert!(index.lookup(&10).is_empty());
        assert_eq!(index.entries(), vec![(11, 3)]);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_with_defaults() {
        let index = SiblingIndex::<u64, u64>::with_defaults().unwrap();
        assert_eq!(index.config(), IndexConfig::default());
        assert_eq!(index.height(), 3);
        assert!(index.is_empty());
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SiblingIndex<u64, String>>();
    }

    #[test]
    fn test_concurrent_writers() {
        let index = Arc::new(index());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        index.insert(i * 4 + t, t);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 1000);
        index.check_invariants().unwrap();
        for key in 0..1000u64 {
            assert_eq!(index.lookup(&key), BTreeSet::from([key % 4]));
        }
    }

    #[test]
    fn test_readers_see_consistent_tree_during_writes() {
        let index = Arc::new(index());
        for i in 0..100u64 {
            index.insert(i, i);
        }

        let writer = {
            let index = Arc::clone(&index);
            thread::spawn(move || {
                for i in 100..2000u64 {
                    index.insert(i, i);
                }
            })
        };
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let index = Arc::clone(&index);
                thread::spawn(move || {
                    for round in 0..200u64 {
                        let key = round % 100;
                        assert_eq!(index.lookup(&key), BTreeSet::from([key]));
                    }
                    index.check_invariants().unwrap();
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(index.len(), 2000);
    }

    #[test]
    fn test_into_inner() {
        let index = index();
        index.insert(1, 1);
        let tree = index.into_inner();
        assert_eq!(tree.len(), 1);
    }
}
