//! Block collections.
//!
//! A block collection is a block file plus an allocator: a free list of
//! recycled positions and a high-water mark at the end of the file. The free
//! list is kept in memory only; reopening a file starts with an empty free
//! list and the high-water mark at the file end.

use std::path::Path;

use silt_common::Result;

use crate::accessor::BlockFile;
use crate::handle::BlockHandle;

/// A block-addressable file with allocation of fresh and recycled blocks.
pub struct BlockCollection {
    file: BlockFile,
    free_list: Vec<u64>,
    end: u64,
}

impl BlockCollection {
    /// Opens (creating if `writeable`) the collection at `path`.
    pub fn open(path: &Path, block_size: u64, writeable: bool) -> Result<Self> {
        let file = BlockFile::open(path, block_size, writeable)?;
        let len = file.len()?;
        let end = len - len % block_size;

        Ok(Self {
            file,
            free_list: Vec::new(),
            end,
        })
    }

    /// Returns the block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.file.block_size()
    }

    /// Allocates a block, recycling a freed position when one is available
    /// and extending past the end of the file otherwise.
    pub fn get_free_block(&mut self) -> BlockHandle {
        let block_size = self.block_size();
        let position = self.free_list.pop().unwrap_or_else(|| {
            let position = self.end;
            self.end += block_size;
            position
        });
        BlockHandle::new(position, block_size)
    }

    /// Returns the block at `handle` to the free list.
    pub fn free_block(&mut self, handle: BlockHandle) {
        assert_eq!(
            handle.size,
            self.block_size(),
            "handle size {} does not match block size {}",
            handle.size,
            self.block_size()
        );
        self.free_list.push(handle.position);
    }

    /// Reads the block at `handle` into `buf`.
    pub fn read_block(&mut self, handle: BlockHandle, buf: &mut [u8]) -> Result<()> {
        self.file.read_block(handle, buf)
    }

    /// Writes `buf` as the block at `handle`.
    pub fn write_block(&mut self, handle: BlockHandle, buf: &[u8]) -> Result<()> {
        self.file.write_block(handle, buf)
    }
}
