//! Block-backed node store.
//!
//! Nodes are serialized one per block into a [`BlockCache`]. The bulk
//! builder emits every node exactly once and never revisits it, so each
//! node costs one cached block write and dirty blocks stream out as the
//! cache evicts them.
//!
//! Block layout:
//!
//! ```text
//! +--------------+---------------+--------------------------+
//! | tag (1 byte) | count (2, LE) | entries (fixed width)    |
//! +--------------+---------------+--------------------------+
//! ```
//!
//! Leaf entries are encoded items. Internal entries are a child tag byte,
//! the child's block position (8 bytes, LE), its minimum key, and its
//! augment.

use std::marker::PhantomData;

use silt_blocks::{BlockCache, BlockHandle};
use silt_common::{Record, Result, SiltError};

use crate::store::{ChildEntry, NodeId, NodeStore, TreeParameters};

const TAG_LEAF: u8 = 1;
const TAG_INTERNAL: u8 = 2;

const HEADER_SIZE: usize = 3;

/// Node store writing each node into one block of a [`BlockCache`].
pub struct BlockStore<T, K, A> {
    cache: BlockCache,
    _marker: PhantomData<(T, K, A)>,
}

impl<T, K, A> BlockStore<T, K, A>
where
    T: Record,
    K: Record,
    A: Record,
{
    /// Bytes of one internal child entry.
    const CHILD_SIZE: usize = 1 + 8 + K::ENCODED_SIZE + A::ENCODED_SIZE;

    /// Wraps a cache, checking that the widest node permitted by `params`
    /// fits in one block.
    pub fn new(cache: BlockCache, params: &TreeParameters) -> Result<Self> {
        let block_size = cache.block_size() as usize;

        let leaf_bytes = HEADER_SIZE + params.max_leaf_size * T::ENCODED_SIZE;
        if leaf_bytes > block_size {
            return Err(SiltError::InvalidParameter {
                name: "max_leaf_size",
                value: format!("{} ({leaf_bytes} bytes > {block_size} block)", params.max_leaf_size),
            });
        }

        let internal_bytes = HEADER_SIZE + params.max_internal_size * Self::CHILD_SIZE;
        if internal_bytes > block_size {
            return Err(SiltError::InvalidParameter {
                name: "max_internal_size",
                value: format!(
                    "{} ({internal_bytes} bytes > {block_size} block)",
                    params.max_internal_size
                ),
            });
        }

        Ok(Self {
            cache,
            _marker: PhantomData,
        })
    }

    /// Writes every dirty node through to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.flush()
    }

    fn handle(&self, position: u64) -> BlockHandle {
        BlockHandle::new(position, self.cache.block_size())
    }

    fn write_node(&mut self, tag: u8, count: usize, fill: impl Fn(&mut [u8])) -> Result<u64> {
        let handle = self.cache.get_free_block()?;
        let buf = self.cache.read_block(handle)?;
        buf[0] = tag;
        buf[1..3].copy_from_slice(&(count as u16).to_le_bytes());
        fill(&mut buf[HEADER_SIZE..]);
        self.cache.write_block(handle);
        Ok(handle.position)
    }

    fn read_node(&mut self, position: u64, expected_tag: u8) -> Result<(usize, Vec<u8>)> {
        let handle = self.handle(position);
        let buf = self.cache.read_block(handle)?;
        let tag = buf[0];
        assert_eq!(tag, expected_tag, "node at {position} has the wrong kind");
        let count = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        Ok((count, buf[HEADER_SIZE..].to_vec()))
    }
}

impl<T, K, A> NodeStore<T, K, A> for BlockStore<T, K, A>
where
    T: Record,
    K: Record,
    A: Record,
{
    fn create_leaf(&mut self, items: &[T]) -> Result<NodeId> {
        let position = self.write_node(TAG_LEAF, items.len(), |body| {
            for (i, item) in items.iter().enumerate() {
                item.encode(&mut body[i * T::ENCODED_SIZE..]);
            }
        })?;
        Ok(NodeId::Leaf(position))
    }

    fn create_internal(&mut self, children: &[ChildEntry<K, A>]) -> Result<NodeId> {
        let position = self.write_node(TAG_INTERNAL, children.len(), |body| {
            for (i, child) in children.iter().enumerate() {
                let entry = &mut body[i * Self::CHILD_SIZE..(i + 1) * Self::CHILD_SIZE];
                let (tag, position) = match child.node {
                    NodeId::Leaf(position) => (TAG_LEAF, position),
                    NodeId::Internal(position) => (TAG_INTERNAL, position),
                };
                entry[0] = tag;
                entry[1..9].copy_from_slice(&position.to_le_bytes());
                child.min_key.encode(&mut entry[9..9 + K::ENCODED_SIZE]);
                child.augment.encode(&mut entry[9 + K::ENCODED_SIZE..]);
            }
        })?;
        Ok(NodeId::Internal(position))
    }

    fn leaf_items(&mut self, id: NodeId) -> Result<Vec<T>> {
        let NodeId::Leaf(position) = id else {
            panic!("leaf_items on an internal node");
        };
        let (count, body) = self.read_node(position, TAG_LEAF)?;
        Ok((0..count)
            .map(|i| T::decode(&body[i * T::ENCODED_SIZE..]))
            .collect())
    }

    fn internal_children(&mut self, id: NodeId) -> Result<Vec<ChildEntry<K, A>>> {
        let NodeId::Internal(position) = id else {
            panic!("internal_children on a leaf node");
        };
        let (count, body) = self.read_node(position, TAG_INTERNAL)?;
        let mut children = Vec::with_capacity(count);
        for i in 0..count {
            let entry = &body[i * Self::CHILD_SIZE..(i + 1) * Self::CHILD_SIZE];
            let mut position_bytes = [0u8; 8];
            position_bytes.copy_from_slice(&entry[1..9]);
            let position = u64::from_le_bytes(position_bytes);
            let node = match entry[0] {
                TAG_LEAF => NodeId::Leaf(position),
                TAG_INTERNAL => NodeId::Internal(position),
                tag => panic!("unknown child tag {tag}"),
            };
            children.push(ChildEntry {
                node,
                min_key: K::decode(&entry[9..9 + K::ENCODED_SIZE]),
                augment: A::decode(&entry[9 + K::ENCODED_SIZE..]),
            });
        }
        Ok(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: u64 = 512;

    fn test_params() -> TreeParameters {
        TreeParameters::new(2, 4, 2, 4)
    }

    fn create_store(dir: &tempfile::TempDir) -> BlockStore<u64, u64, u64> {
        let cache = BlockCache::open(&dir.path().join("tree.dat"), BLOCK_SIZE, 8, true).unwrap();
        BlockStore::new(cache, &test_params()).unwrap()
    }

    #[test]
    fn test_leaf_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = create_store(&dir);

        let leaf = store.create_leaf(&[10, 20, 30]).unwrap();
        assert_eq!(store.leaf_items(leaf).unwrap(), vec![10, 20, 30]);
    }

    #[test]
    fn test_internal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = create_store(&dir);

        let left = store.create_leaf(&[1, 2]).unwrap();
        let right = store.create_leaf(&[5, 6]).unwrap();
        let children = vec![
            ChildEntry {
                node: left,
                min_key: 1u64,
                augment: 2u64,
            },
            ChildEntry {
                node: right,
                min_key: 5u64,
                augment: 2u64,
            },
        ];

        let internal = store.create_internal(&children).unwrap();
        assert_eq!(store.internal_children(internal).unwrap(), children);
    }

    #[test]
    fn test_nodes_survive_eviction() {
        let dir = tempfile::tempdir().unwrap();
        // A two-block cache forces every earlier node out to disk.
        let cache = BlockCache::open(&dir.path().join("tree.dat"), BLOCK_SIZE, 2, true).unwrap();
        let mut store: BlockStore<u64, u64, u64> =
            BlockStore::new(cache, &test_params()).unwrap();

        let leaves: Vec<NodeId> = (0..10)
            .map(|i| store.create_leaf(&[i, i + 1]).unwrap())
            .collect();

        for (i, &leaf) in leaves.iter().enumerate() {
            let i = i as u64;
            assert_eq!(store.leaf_items(leaf).unwrap(), vec![i, i + 1]);
        }
    }

    #[test]
    fn test_oversized_node_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BlockCache::open(&dir.path().join("tree.dat"), 32, 2, true).unwrap();
        let params = TreeParameters::new(8, 16, 8, 16);
        let result = BlockStore::<u64, u64, u64>::new(cache, &params);
        assert!(matches!(
            result,
            Err(SiltError::InvalidParameter { name: "max_leaf_size", .. })
        ));
    }
}
