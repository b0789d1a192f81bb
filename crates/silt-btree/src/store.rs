//! Node stores and tree parameters.

use silt_common::Result;

/// Identifier of a stored tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeId {
    /// A leaf node.
    Leaf(u64),
    /// An internal node.
    Internal(u64),
}

impl NodeId {
    /// Returns true for leaf identifiers.
    pub fn is_leaf(&self) -> bool {
        matches!(self, NodeId::Leaf(_))
    }
}

/// What a parent keeps per child: the child's identifier, its minimum
/// routing key, and its augment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry<K, A> {
    /// The child node.
    pub node: NodeId,
    /// Minimum key of the child's subtree.
    pub min_key: K,
    /// Application-defined summary of the child's subtree.
    pub augment: A,
}

/// Fanout bounds of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParameters {
    /// Fewest items per non-root leaf.
    pub min_leaf_size: usize,
    /// Most items per leaf.
    pub max_leaf_size: usize,
    /// Fewest children per non-root internal node.
    pub min_internal_size: usize,
    /// Most children per internal node.
    pub max_internal_size: usize,
}

impl Default for TreeParameters {
    fn default() -> Self {
        Self {
            min_leaf_size: 8,
            max_leaf_size: 16,
            min_internal_size: 8,
            max_internal_size: 16,
        }
    }
}

impl TreeParameters {
    /// Creates parameters from explicit bounds.
    ///
    /// # Panics
    ///
    /// Panics when the bounds leave no valid split: each maximum must be at
    /// least `2 * minimum - 1`.
    pub fn new(
        min_leaf_size: usize,
        max_leaf_size: usize,
        min_internal_size: usize,
        max_internal_size: usize,
    ) -> Self {
        assert!(min_leaf_size >= 1, "leaves need at least 1 item");
        assert!(min_internal_size >= 2, "internal nodes need at least 2 children");
        assert!(
            max_leaf_size >= 2 * min_leaf_size - 1,
            "max leaf size {max_leaf_size} leaves no valid split for min {min_leaf_size}"
        );
        assert!(
            max_internal_size >= 2 * min_internal_size - 1,
            "max internal size {max_internal_size} leaves no valid split for min {min_internal_size}"
        );
        Self {
            min_leaf_size,
            max_leaf_size,
            min_internal_size,
            max_internal_size,
        }
    }

    /// The number of items the builder targets per leaf.
    pub fn desired_leaf_size(&self) -> usize {
        (self.min_leaf_size + self.max_leaf_size) / 2
    }

    /// Buffered items at which the builder extracts a leaf.
    pub fn leaf_tipping_point(&self) -> usize {
        self.desired_leaf_size() + self.min_leaf_size
    }

    /// The number of children the builder targets per internal node.
    pub fn desired_internal_size(&self) -> usize {
        (self.min_internal_size + self.max_internal_size) / 2
    }

    /// Buffered nodes at which the builder emits an internal node.
    pub fn internal_tipping_point(&self) -> usize {
        self.desired_internal_size() + self.min_internal_size
    }
}

/// Computes the augment of a node from its contents, bottom-up.
pub trait Augmenter<T, K> {
    /// The summary type attached to every node.
    type Augment: Clone;

    /// Summarizes a leaf from its items.
    fn leaf(&self, items: &[T]) -> Self::Augment;

    /// Summarizes an internal node from its child entries.
    fn internal(&self, children: &[ChildEntry<K, Self::Augment>]) -> Self::Augment;
}

/// Augmenter attaching no information.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAugment;

impl<T, K> Augmenter<T, K> for NoAugment {
    type Augment = ();

    fn leaf(&self, _items: &[T]) {}

    fn internal(&self, _children: &[ChildEntry<K, ()>]) {}
}

/// Augmenter tracking subtree item counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct CountAugment;

impl<T, K> Augmenter<T, K> for CountAugment {
    type Augment = u64;

    fn leaf(&self, items: &[T]) -> u64 {
        items.len() as u64
    }

    fn internal(&self, children: &[ChildEntry<K, u64>]) -> u64 {
        children.iter().map(|child| child.augment).sum()
    }
}

/// Storage backend for tree nodes. The builder writes each node exactly
/// once and never revisits it.
pub trait NodeStore<T, K, A> {
    /// Persists a leaf holding `items`, in order.
    fn create_leaf(&mut self, items: &[T]) -> Result<NodeId>;

    /// Persists an internal node holding `children`, in order.
    fn create_internal(&mut self, children: &[ChildEntry<K, A>]) -> Result<NodeId>;

    /// Reads back the items of a leaf.
    fn leaf_items(&mut self, id: NodeId) -> Result<Vec<T>>;

    /// Reads back the child entries of an internal node.
    fn internal_children(&mut self, id: NodeId) -> Result<Vec<ChildEntry<K, A>>>;
}
