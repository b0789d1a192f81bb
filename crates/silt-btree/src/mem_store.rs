//! In-memory node store.

use silt_common::Result;

use crate::store::{ChildEntry, NodeId, NodeStore};

/// Node store keeping every node in a pair of arenas. Suitable for trees
/// that fit in memory and for tests.
pub struct MemStore<T, K, A> {
    leaves: Vec<Vec<T>>,
    internals: Vec<Vec<ChildEntry<K, A>>>,
}

impl<T, K, A> MemStore<T, K, A> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            leaves: Vec::new(),
            internals: Vec::new(),
        }
    }

    /// Returns the number of stored leaves.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Returns the number of stored internal nodes.
    pub fn internal_count(&self) -> usize {
        self.internals.len()
    }
}

impl<T, K, A> Default for MemStore<T, K, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, K, A> NodeStore<T, K, A> for MemStore<T, K, A>
where
    T: Clone,
    K: Clone,
    A: Clone,
{
    fn create_leaf(&mut self, items: &[T]) -> Result<NodeId> {
        self.leaves.push(items.to_vec());
        Ok(NodeId::Leaf(self.leaves.len() as u64 - 1))
    }

    fn create_internal(&mut self, children: &[ChildEntry<K, A>]) -> Result<NodeId> {
        self.internals.push(children.to_vec());
        Ok(NodeId::Internal(self.internals.len() as u64 - 1))
    }

    fn leaf_items(&mut self, id: NodeId) -> Result<Vec<T>> {
        match id {
            NodeId::Leaf(index) => Ok(self.leaves[index as usize].clone()),
            NodeId::Internal(_) => panic!("leaf_items on an internal node"),
        }
    }

    fn internal_children(&mut self, id: NodeId) -> Result<Vec<ChildEntry<K, A>>> {
        match id {
            NodeId::Internal(index) => Ok(self.internals[index as usize].clone()),
            NodeId::Leaf(_) => panic!("internal_children on a leaf node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut store: MemStore<u32, u32, ()> = MemStore::new();

        let leaf = store.create_leaf(&[1, 2, 3]).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(store.leaf_items(leaf).unwrap(), vec![1, 2, 3]);

        let children = vec![ChildEntry {
            node: leaf,
            min_key: 1u32,
            augment: (),
        }];
        let internal = store.create_internal(&children).unwrap();
        assert!(!internal.is_leaf());
        assert_eq!(store.internal_children(internal).unwrap(), children);
    }

    #[test]
    #[should_panic(expected = "leaf_items on an internal node")]
    fn test_wrong_kind_panics() {
        let mut store: MemStore<u32, u32, ()> = MemStore::new();
        let _ = store.leaf_items(NodeId::Internal(0));
    }
}
