//! Block-level file I/O.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use silt_common::{Result, SiltError};

use crate::handle::BlockHandle;

/// Reads and writes fixed-size blocks at byte offsets in a single file.
pub struct BlockFile {
    file: File,
    block_size: u64,
    writeable: bool,
}

impl BlockFile {
    /// Opens (creating if `writeable`) the file at `path` for block access.
    pub fn open(path: &Path, block_size: u64, writeable: bool) -> Result<Self> {
        assert!(block_size > 0, "block size must be positive");

        let file = OpenOptions::new()
            .read(true)
            .write(writeable)
            .create(writeable)
            .open(path)?;

        Ok(Self {
            file,
            block_size,
            writeable,
        })
    }

    /// Returns the block size in bytes.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Returns the current file length in bytes.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Returns true if the file holds no blocks.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads the block at `handle` into `buf`.
    pub fn read_block(&mut self, handle: BlockHandle, buf: &mut [u8]) -> Result<()> {
        self.check_handle(handle, buf.len());

        let file_len = self.len()?;
        if handle.position + self.block_size > file_len {
            return Err(SiltError::BlockOutOfBounds {
                position: handle.position,
                file_len,
            });
        }

        self.file.seek(SeekFrom::Start(handle.position))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` as the block at `handle`, extending the file if needed.
    pub fn write_block(&mut self, handle: BlockHandle, buf: &[u8]) -> Result<()> {
        self.check_handle(handle, buf.len());

        if !self.writeable {
            return Err(SiltError::ReadOnlyCollection);
        }

        self.file.seek(SeekFrom::Start(handle.position))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn check_handle(&self, handle: BlockHandle, buf_len: usize) {
        assert_eq!(
            handle.size, self.block_size,
            "handle size {} does not match block size {}",
            handle.size, self.block_size
        );
        assert_eq!(
            buf_len as u64, self.block_size,
            "buffer size {} does not match block size {}",
            buf_len, self.block_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: u64 = 512;

    fn create_test_file() -> (BlockFile, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let file = BlockFile::open(&dir.path().join("blocks.dat"), BLOCK_SIZE, true).unwrap();
        (file, dir)
    }

    #[test]
    fn test_write_then_read() {
        let (mut file, _dir) = create_test_file();
        let handle = BlockHandle::new(0, BLOCK_SIZE);

        let mut data = vec![0u8; BLOCK_SIZE as usize];
        data[0] = 0xAB;
        data[BLOCK_SIZE as usize - 1] = 0xCD;
        file.write_block(handle, &data).unwrap();

        let mut read_back = vec![0u8; BLOCK_SIZE as usize];
        file.read_block(handle, &mut read_back).unwrap();
        assert_eq!(read_back, data);
    }

    #[test]
    fn test_write_extends_file() {
        let (mut file, _dir) = create_test_file();
        let handle = BlockHandle::new(3 * BLOCK_SIZE, BLOCK_SIZE);

        let data = vec![0x11u8; BLOCK_SIZE as usize];
        file.write_block(handle, &data).unwrap();

        assert_eq!(file.len().unwrap(), 4 * BLOCK_SIZE);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let (mut file, _dir) = create_test_file();
        let handle = BlockHandle::new(8 * BLOCK_SIZE, BLOCK_SIZE);

        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        let err = file.read_block(handle, &mut buf).unwrap_err();
        assert!(matches!(err, SiltError::BlockOutOfBounds { .. }));
    }

    #[test]
    fn test_read_only_write_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.dat");
        std::fs::write(&path, vec![0u8; BLOCK_SIZE as usize]).unwrap();

        let mut file = BlockFile::open(&path, BLOCK_SIZE, false).unwrap();
        let handle = BlockHandle::new(0, BLOCK_SIZE);

        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        file.read_block(handle, &mut buf).unwrap();

        let err = file.write_block(handle, &buf).unwrap_err();
        assert!(matches!(err, SiltError::ReadOnlyCollection));
    }

    #[test]
    #[should_panic(expected = "does not match block size")]
    fn test_wrong_handle_size_panics() {
        let (mut file, _dir) = create_test_file();
        let handle = BlockHandle::new(0, BLOCK_SIZE * 2);
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        let _ = file.read_block(handle, &mut buf);
    }

    #[test]
    fn test_overwrite_block() {
        let (mut file, _dir) = create_test_file();
        let handle = BlockHandle::new(BLOCK_SIZE, BLOCK_SIZE);

        file.write_block(handle, &vec![0xAAu8; BLOCK_SIZE as usize])
            .unwrap();
        file.write_block(handle, &vec![0xBBu8; BLOCK_SIZE as usize])
            .unwrap();

        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        file.read_block(handle, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xBB));
    }
}
