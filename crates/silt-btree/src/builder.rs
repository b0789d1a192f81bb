//! Bottom-up bulk tree construction.
//!
//! The builder consumes values in key order and emits a finished tree with
//! purely sequential writes. Incoming items collect in a deque; when the
//! deque reaches the leaf tipping point, a leaf of the desired size is
//! extracted from the front. Finished leaves collect in their own deque,
//! internal nodes in one deque per level, each cascading upward at its
//! tipping point. `build` flushes the residue of every level into one or
//! two final nodes (two when one would exceed the maximum) and crowns the
//! single survivor of the top level as the root.

use std::collections::VecDeque;

use silt_common::Result;

use crate::store::{Augmenter, ChildEntry, NodeId, NodeStore, TreeParameters};
use crate::tree::BTree;

/// Streaming builder of an augmented B-tree from sorted input.
pub struct BTreeBuilder<T, K, AG, S, KF>
where
    AG: Augmenter<T, K>,
{
    params: TreeParameters,
    store: S,
    key_of: KF,
    augmenter: AG,
    items: VecDeque<T>,
    leaves: VecDeque<ChildEntry<K, AG::Augment>>,
    internal_levels: Vec<VecDeque<ChildEntry<K, AG::Augment>>>,
    size: u64,
}

impl<T, K, AG, S, KF> BTreeBuilder<T, K, AG, S, KF>
where
    T: Clone,
    K: Clone,
    AG: Augmenter<T, K>,
    S: NodeStore<T, K, AG::Augment>,
    KF: Fn(&T) -> K,
{
    /// Creates a builder emitting nodes into `store`.
    pub fn new(store: S, params: TreeParameters, key_of: KF, augmenter: AG) -> Self {
        Self {
            params,
            store,
            key_of,
            augmenter,
            items: VecDeque::new(),
            leaves: VecDeque::new(),
            internal_levels: Vec::new(),
            size: 0,
        }
    }

    /// Pushes the next value. Values must arrive in non-decreasing key
    /// order; the builder does not re-sort.
    pub fn push(&mut self, value: T) -> Result<()> {
        self.items.push_back(value);
        self.size += 1;

        if self.items.len() < self.params.leaf_tipping_point() {
            return Ok(());
        }
        self.extract_nodes()
    }

    /// Finishes the tree and returns it. The builder is consumed.
    pub fn build(mut self) -> Result<BTree<T, K, AG::Augment, S>> {
        // Flush residual items into one or two leaves.
        if !self.items.is_empty() {
            if self.items.len() > self.params.max_leaf_size {
                self.construct_leaf(self.items.len() / 2)?;
            }
            self.construct_leaf(self.items.len())?;
        }

        // With internal levels present every remaining leaf must move up;
        // without them, only multiple leaves warrant an internal node.
        if (self.internal_levels.is_empty() && self.leaves.len() > 1)
            || (!self.internal_levels.is_empty() && !self.leaves.is_empty())
        {
            if self.leaves.len() > self.params.max_internal_size {
                self.construct_internal(self.leaves.len() / 2, 0)?;
            }
            self.construct_internal(self.leaves.len(), 0)?;
        }

        let mut level = 0;
        while level < self.internal_levels.len() {
            let count = self.internal_levels[level].len();
            let is_top = level + 1 == self.internal_levels.len();
            if (is_top && count > 1) || (!is_top && count > 0) {
                if count > self.params.max_internal_size {
                    self.construct_internal(count / 2, level + 1)?;
                }
                let rest = self.internal_levels[level].len();
                self.construct_internal(rest, level + 1)?;
            }
            level += 1;
        }

        let (root, height) = if self.leaves.is_empty() && self.internal_levels.is_empty() {
            (None, 0)
        } else if self.internal_levels.is_empty() {
            (Some(self.leaves.pop_front().expect("leaf root")), 1)
        } else {
            let top = self
                .internal_levels
                .last_mut()
                .and_then(|level| level.pop_front())
                .expect("internal root");
            (Some(top), self.internal_levels.len() + 1)
        };

        tracing::debug!(items = self.size, height, "built tree");
        Ok(BTree::new(self.store, root, height, self.size))
    }

    /// Extracts one leaf, then cascades internal-node construction up the
    /// levels for as long as a level is at its tipping point.
    fn extract_nodes(&mut self) -> Result<()> {
        self.construct_leaf(self.params.desired_leaf_size())?;

        if self.leaves.len() < self.params.internal_tipping_point() {
            return Ok(());
        }
        self.construct_internal(self.params.desired_internal_size(), 0)?;

        let mut level = 0;
        while level < self.internal_levels.len() {
            // A level below its tipping point stops the cascade; higher
            // levels cannot be fuller.
            if self.internal_levels[level].len() < self.params.internal_tipping_point() {
                return Ok(());
            }
            self.construct_internal(self.params.desired_internal_size(), level + 1)?;
            level += 1;
        }
        Ok(())
    }

    /// Emits a leaf from the first `size` buffered items.
    fn construct_leaf(&mut self, size: usize) -> Result<()> {
        let items: Vec<T> = self.items.drain(..size).collect();
        let node = self.store.create_leaf(&items)?;
        self.leaves.push_back(ChildEntry {
            node,
            min_key: (self.key_of)(&items[0]),
            augment: self.augmenter.leaf(&items),
        });
        Ok(())
    }

    /// Emits an internal node at `level` from the first `size` nodes of the
    /// level below (level 0 consumes leaves).
    fn construct_internal(&mut self, size: usize, level: usize) -> Result<()> {
        let source = if level == 0 {
            &mut self.leaves
        } else {
            &mut self.internal_levels[level - 1]
        };
        let children: Vec<ChildEntry<K, AG::Augment>> = source.drain(..size).collect();

        let node = self.store.create_internal(&children)?;
        let entry = ChildEntry {
            node,
            min_key: children[0].min_key.clone(),
            augment: self.augmenter.internal(&children),
        };

        if self.internal_levels.len() < level + 1 {
            self.internal_levels.push(VecDeque::new());
        }
        self.internal_levels[level].push_back(entry);
        Ok(())
    }
}
