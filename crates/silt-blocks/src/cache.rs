//! Write-back LRU cache over a block collection.
//!
//! The cache keeps up to `max_blocks` resident blocks. Reads promote the
//! block to most-recently-used; writes only mark the resident block dirty.
//! Dirty blocks reach disk when they are evicted, when [`BlockCache::flush`]
//! is called, or when the cache is dropped.
//!
//! Buffers live in an arena indexed by a handle map; the LRU order is an
//! intrusive doubly linked list over arena indices, so there is no owning
//! cycle between the map and the list.
//!
//! The cache is single-threaded; callers needing shared access must
//! serialize externally.

use std::collections::HashMap;
use std::path::Path;

use silt_common::Result;

use crate::collection::BlockCollection;
use crate::handle::BlockHandle;

const NIL: usize = usize::MAX;

struct CacheEntry {
    handle: BlockHandle,
    buffer: Box<[u8]>,
    dirty: bool,
    prev: usize,
    next: usize,
}

/// Fixed-capacity write-back LRU cache in front of a [`BlockCollection`].
pub struct BlockCache {
    collection: BlockCollection,
    entries: Vec<CacheEntry>,
    map: HashMap<BlockHandle, usize>,
    free_entries: Vec<usize>,
    /// Least recently used entry, evicted first.
    head: usize,
    /// Most recently used entry.
    tail: usize,
    max_blocks: usize,
}

impl BlockCache {
    /// Opens (creating if `writeable`) the collection at `path` behind a
    /// cache of `max_blocks` blocks.
    pub fn open(path: &Path, block_size: u64, max_blocks: usize, writeable: bool) -> Result<Self> {
        assert!(max_blocks > 0, "cache capacity must be positive");

        let collection = BlockCollection::open(path, block_size, writeable)?;
        Ok(Self {
            collection,
            entries: Vec::with_capacity(max_blocks),
            map: HashMap::with_capacity(max_blocks),
            free_entries: Vec::new(),
            head: NIL,
            tail: NIL,
            max_blocks,
        })
    }

    /// Returns the block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.collection.block_size()
    }

    /// Returns the number of resident blocks.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no blocks are resident.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the cache capacity in blocks.
    pub fn capacity(&self) -> usize {
        self.max_blocks
    }

    /// Returns true if the block at `handle` is resident.
    pub fn contains(&self, handle: BlockHandle) -> bool {
        self.map.contains_key(&handle)
    }

    /// Returns true if the block at `handle` is resident and dirty.
    pub fn is_dirty(&self, handle: BlockHandle) -> bool {
        self.map
            .get(&handle)
            .map(|&idx| self.entries[idx].dirty)
            .unwrap_or(false)
    }

    /// Allocates a fresh block, inserts it into the cache zeroed and dirty,
    /// and returns its handle. May evict the least recently used block.
    pub fn get_free_block(&mut self) -> Result<BlockHandle> {
        self.make_room()?;
        let handle = self.collection.get_free_block();
        let idx = self.acquire_entry(handle);
        self.entries[idx].buffer.fill(0);
        self.entries[idx].dirty = true;
        self.map.insert(handle, idx);
        self.attach_tail(idx);
        Ok(handle)
    }

    /// Returns the resident buffer for `handle`, reading it from disk on a
    /// miss. Promotes the block to most recently used. The caller may mutate
    /// the buffer, but the mutation only becomes durable after a
    /// [`write_block`](BlockCache::write_block) marks the block dirty.
    pub fn read_block(&mut self, handle: BlockHandle) -> Result<&mut [u8]> {
        if let Some(&idx) = self.map.get(&handle) {
            self.touch(idx);
            return Ok(&mut self.entries[idx].buffer);
        }

        self.make_room()?;
        let idx = self.acquire_entry(handle);
        if let Err(err) = {
            let entry = &mut self.entries[idx];
            self.collection.read_block(handle, &mut entry.buffer)
        } {
            self.free_entries.push(idx);
            return Err(err);
        }
        self.entries[idx].dirty = false;
        self.map.insert(handle, idx);
        self.attach_tail(idx);
        Ok(&mut self.entries[idx].buffer)
    }

    /// Marks the resident block at `handle` dirty and promotes it to most
    /// recently used. No I/O occurs.
    ///
    /// # Panics
    ///
    /// Panics if the block is not resident; a block must be read (or freshly
    /// allocated) and not yet evicted before it can be written.
    pub fn write_block(&mut self, handle: BlockHandle) {
        let Some(&idx) = self.map.get(&handle) else {
            panic!("write_block on a handle not resident in the cache: {handle}");
        };
        self.touch(idx);
        self.entries[idx].dirty = true;
    }

    /// Drops the block at `handle` from the cache without writing it back,
    /// then frees it in the collection.
    pub fn free_block(&mut self, handle: BlockHandle) {
        assert_eq!(
            handle.size,
            self.block_size(),
            "handle size {} does not match block size {}",
            handle.size,
            self.block_size()
        );

        if let Some(idx) = self.map.remove(&handle) {
            self.detach(idx);
            self.free_entries.push(idx);
        }
        self.collection.free_block(handle);
    }

    /// Writes every dirty resident block back to disk. On failure the
    /// offending block stays resident and dirty and the error surfaces.
    pub fn flush(&mut self) -> Result<()> {
        let mut idx = self.head;
        while idx != NIL {
            if self.entries[idx].dirty {
                let entry = &mut self.entries[idx];
                self.collection.write_block(entry.handle, &entry.buffer)?;
                entry.dirty = false;
            }
            idx = self.entries[idx].next;
        }
        Ok(())
    }

    /// Evicts the least recently used block if the cache is at capacity,
    /// writing it back first when dirty.
    fn make_room(&mut self) -> Result<()> {
        if self.map.len() < self.max_blocks {
            return Ok(());
        }

        let idx = self.head;
        if self.entries[idx].dirty {
            let entry = &mut self.entries[idx];
            tracing::debug!(handle = %entry.handle, "evicting dirty block");
            self.collection.write_block(entry.handle, &entry.buffer)?;
            entry.dirty = false;
        }
        let handle = self.entries[idx].handle;
        self.detach(idx);
        self.map.remove(&handle);
        self.free_entries.push(idx);
        Ok(())
    }

    /// Reuses a freed arena slot or grows the arena, leaving the slot
    /// detached from the LRU list.
    fn acquire_entry(&mut self, handle: BlockHandle) -> usize {
        let block_size = self.block_size() as usize;
        match self.free_entries.pop() {
            Some(idx) => {
                let entry = &mut self.entries[idx];
                entry.handle = handle;
                entry.dirty = false;
                entry.prev = NIL;
                entry.next = NIL;
                idx
            }
            None => {
                self.entries.push(CacheEntry {
                    handle,
                    buffer: vec![0u8; block_size].into_boxed_slice(),
                    dirty: false,
                    prev: NIL,
                    next: NIL,
                });
                self.entries.len() - 1
            }
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.tail == idx {
            return;
        }
        self.detach(idx);
        self.attach_tail(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.entries[idx].prev, self.entries[idx].next);
        if prev != NIL {
            self.entries[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.entries[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.entries[idx].prev = NIL;
        self.entries[idx].next = NIL;
    }

    fn attach_tail(&mut self, idx: usize) {
        self.entries[idx].prev = self.tail;
        self.entries[idx].next = NIL;
        if self.tail != NIL {
            self.entries[self.tail].next = idx;
        } else {
            self.head = idx;
        }
        self.tail = idx;
    }
}

impl Drop for BlockCache {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::error!(error = %err, "failed to write back dirty blocks on drop");
        }
    }
}
