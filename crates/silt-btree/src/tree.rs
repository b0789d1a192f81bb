//! The built tree.

use std::marker::PhantomData;

use silt_common::Result;

use crate::store::{Augmenter, ChildEntry, NodeId, NodeStore, TreeParameters};

/// An augmented B-tree produced by the bulk builder.
///
/// The tree keeps its root's entry (identifier, minimum key, and augment)
/// in memory; everything else lives in the node store.
pub struct BTree<T, K, A, S> {
    store: S,
    root: Option<ChildEntry<K, A>>,
    height: usize,
    len: u64,
    _marker: PhantomData<T>,
}

impl<T, K, A, S> BTree<T, K, A, S>
where
    T: Clone,
    K: Clone,
    A: Clone,
    S: NodeStore<T, K, A>,
{
    pub(crate) fn new(store: S, root: Option<ChildEntry<K, A>>, height: usize, len: u64) -> Self {
        Self {
            store,
            root,
            height,
            len,
            _marker: PhantomData,
        }
    }

    /// Returns the height of the tree: 0 when empty, 1 for a single leaf.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the number of items in the tree.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no items were pushed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the root's augment, if the tree is non-empty.
    pub fn root_augment(&self) -> Option<&A> {
        self.root.as_ref().map(|root| &root.augment)
    }

    /// Returns the minimum key, if the tree is non-empty.
    pub fn min_key(&self) -> Option<&K> {
        self.root.as_ref().map(|root| &root.min_key)
    }

    /// Gives access to the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Invokes `f` on every item in key order.
    pub fn for_each<G: FnMut(&T)>(&mut self, f: &mut G) -> Result<()> {
        let Some(root) = self.root.clone() else {
            return Ok(());
        };
        walk(&mut self.store, root.node, f)
    }

    /// Collects every item in key order.
    pub fn items(&mut self) -> Result<Vec<T>> {
        let mut items = Vec::with_capacity(self.len as usize);
        self.for_each(&mut |item: &T| items.push(item.clone()))?;
        Ok(items)
    }

    /// Walks the whole tree verifying its structural invariants: node
    /// counts within bounds, uniform leaf depth, stored minimum keys and
    /// augments matching their subtrees.
    ///
    /// # Panics
    ///
    /// Panics on the first violated invariant.
    pub fn check_invariants<KF, AG>(
        &mut self,
        params: &TreeParameters,
        key_of: KF,
        augmenter: &AG,
    ) -> Result<()>
    where
        K: PartialEq + std::fmt::Debug,
        A: PartialEq + std::fmt::Debug,
        KF: Fn(&T) -> K,
        AG: Augmenter<T, K, Augment = A>,
    {
        let Some(root) = self.root.clone() else {
            assert_eq!(self.height, 0, "empty tree must have height 0");
            assert_eq!(self.len, 0, "empty tree must have no items");
            return Ok(());
        };

        let summary = check_node(
            &mut self.store,
            params,
            &key_of,
            augmenter,
            root.node,
            true,
        )?;
        assert_eq!(summary.height, self.height, "stored height is wrong");
        assert_eq!(summary.items, self.len, "stored item count is wrong");
        assert!(
            summary.min_key == root.min_key,
            "root min key {:?} does not match subtree {:?}",
            root.min_key,
            summary.min_key
        );
        assert!(
            summary.augment == root.augment,
            "root augment {:?} does not match subtree {:?}",
            root.augment,
            summary.augment
        );
        Ok(())
    }
}

fn walk<T, K, A, S, G>(store: &mut S, id: NodeId, f: &mut G) -> Result<()>
where
    S: NodeStore<T, K, A>,
    G: FnMut(&T),
{
    if id.is_leaf() {
        for item in store.leaf_items(id)? {
            f(&item);
        }
        return Ok(());
    }
    for child in store.internal_children(id)? {
        walk(store, child.node, f)?;
    }
    Ok(())
}

struct SubtreeSummary<K, A> {
    height: usize,
    items: u64,
    min_key: K,
    augment: A,
}

fn check_node<T, K, A, S, KF, AG>(
    store: &mut S,
    params: &TreeParameters,
    key_of: &KF,
    augmenter: &AG,
    id: NodeId,
    is_root: bool,
) -> Result<SubtreeSummary<K, A>>
where
    K: Clone + PartialEq + std::fmt::Debug,
    A: Clone + PartialEq + std::fmt::Debug,
    S: NodeStore<T, K, A>,
    KF: Fn(&T) -> K,
    AG: Augmenter<T, K, Augment = A>,
{
    if id.is_leaf() {
        let items = store.leaf_items(id)?;
        assert!(!items.is_empty(), "leaf with no items");
        assert!(
            items.len() <= params.max_leaf_size,
            "leaf holds {} items, max is {}",
            items.len(),
            params.max_leaf_size
        );
        if !is_root {
            assert!(
                items.len() >= params.min_leaf_size,
                "non-root leaf holds {} items, min is {}",
                items.len(),
                params.min_leaf_size
            );
        }
        return Ok(SubtreeSummary {
            height: 1,
            items: items.len() as u64,
            min_key: key_of(&items[0]),
            augment: augmenter.leaf(&items),
        });
    }

    let children = store.internal_children(id)?;
    assert!(!children.is_empty(), "internal node with no children");
    assert!(
        children.len() <= params.max_internal_size,
        "internal node holds {} children, max is {}",
        children.len(),
        params.max_internal_size
    );
    if !is_root {
        assert!(
            children.len() >= params.min_internal_size,
            "non-root internal node holds {} children, min is {}",
            children.len(),
            params.min_internal_size
        );
    }

    let mut child_height = None;
    let mut items = 0;
    for child in &children {
        let summary = check_node(store, params, key_of, augmenter, child.node, false)?;
        match child_height {
            None => child_height = Some(summary.height),
            Some(height) => {
                assert_eq!(height, summary.height, "tree is not height-balanced")
            }
        }
        assert!(
            child.min_key == summary.min_key,
            "stored min key {:?} does not match subtree {:?}",
            child.min_key,
            summary.min_key
        );
        assert!(
            child.augment == summary.augment,
            "stored augment {:?} does not match subtree {:?}",
            child.augment,
            summary.augment
        );
        items += summary.items;
    }

    Ok(SubtreeSummary {
        height: child_height.expect("internal node with no children") + 1,
        items,
        min_key: children[0].min_key.clone(),
        augment: augmenter.internal(&children),
    })
}
