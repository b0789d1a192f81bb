//! Sequential record streams over scratch files.
//!
//! The external sorter and the external priority queue both stage sorted
//! runs in flat scratch files. A [`RecordWriter`] appends fixed-width
//! records; a [`RecordReader`] streams them back, optionally starting at an
//! item offset and bounded by an item count. End of stream is an expected
//! condition, reported as `Ok(None)`, never as an error.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{Result, SiltError};
use crate::record::Record;

/// Buffer size used for stream I/O, in bytes.
pub const STREAM_BUFFER_SIZE: usize = 8 * 1024;

/// Approximate resident memory of one open stream, in bytes. Used by the
/// sorter's memory accounting.
pub fn stream_memory_usage() -> usize {
    STREAM_BUFFER_SIZE + 128
}

/// Append-only writer of fixed-width records.
pub struct RecordWriter<T: Record> {
    inner: BufWriter<File>,
    scratch: Vec<u8>,
    written: u64,
    _marker: PhantomData<T>,
}

impl<T: Record> RecordWriter<T> {
    /// Creates (or truncates) the file at `path` and writes from the start.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(file))
    }

    /// Opens (or creates) the file at `path` and appends at the end.
    pub fn append(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new().write(true).create(true).open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: File) -> Self {
        Self {
            inner: BufWriter::with_capacity(STREAM_BUFFER_SIZE, file),
            scratch: vec![0u8; T::ENCODED_SIZE],
            written: 0,
            _marker: PhantomData,
        }
    }

    /// Appends one record.
    pub fn write(&mut self, item: &T) -> Result<()> {
        item.encode(&mut self.scratch);
        self.inner.write_all(&self.scratch)?;
        self.written += 1;
        Ok(())
    }

    /// Returns the number of records written through this writer.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes buffered records to the file.
    pub fn finish(mut self) -> Result<u64> {
        self.inner.flush()?;
        Ok(self.written)
    }
}

/// Sequential reader of fixed-width records.
pub struct RecordReader<T: Record> {
    inner: BufReader<File>,
    scratch: Vec<u8>,
    remaining: u64,
    _marker: PhantomData<T>,
}

impl<T: Record> RecordReader<T> {
    /// Opens `path` for reading, positioned at item `start_item` and bounded
    /// by `max_items` records. The reader stops early at end of file.
    pub fn open(path: &Path, start_item: u64, max_items: u64) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        if start_item > 0 {
            file.seek(SeekFrom::Start(start_item * T::ENCODED_SIZE as u64))?;
        }
        Ok(Self {
            inner: BufReader::with_capacity(STREAM_BUFFER_SIZE, file),
            scratch: vec![0u8; T::ENCODED_SIZE],
            remaining: max_items,
            _marker: PhantomData,
        })
    }

    /// Reads the next record. Returns `Ok(None)` at the item bound or at a
    /// clean end of file; a partial trailing record is an error.
    pub fn next_item(&mut self) -> Result<Option<T>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let size = T::ENCODED_SIZE;
        let mut filled = 0;
        while filled < size {
            let n = self.inner.read(&mut self.scratch[filled..size])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            self.remaining = 0;
            return Ok(None);
        }
        if filled < size {
            return Err(SiltError::TruncatedRecord {
                context: "record stream",
                expected: size,
                actual: filled,
            });
        }
        self.remaining -= 1;
        Ok(Some(T::decode(&self.scratch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_items(path: &Path, items: &[u64]) {
        let mut writer = RecordWriter::create(path).unwrap();
        for item in items {
            writer.write(item).unwrap();
        }
        assert_eq!(writer.finish().unwrap(), items.len() as u64);
    }

    fn read_all(reader: &mut RecordReader<u64>) -> Vec<u64> {
        let mut items = Vec::new();
        while let Some(item) = reader.next_item().unwrap() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        write_items(&path, &[3, 1, 4, 1, 5]);

        let mut reader = RecordReader::open(&path, 0, u64::MAX).unwrap();
        assert_eq!(read_all(&mut reader), vec![3, 1, 4, 1, 5]);
        assert!(reader.next_item().unwrap().is_none());
    }

    #[test]
    fn test_read_from_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        write_items(&path, &[10, 20, 30, 40]);

        let mut reader = RecordReader::open(&path, 2, u64::MAX).unwrap();
        assert_eq!(read_all(&mut reader), vec![30, 40]);
    }

    #[test]
    fn test_read_bounded_by_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        write_items(&path, &[10, 20, 30, 40]);

        let mut reader = RecordReader::open(&path, 1, 2).unwrap();
        assert_eq!(read_all(&mut reader), vec![20, 30]);
    }

    #[test]
    fn test_append_continues_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        write_items(&path, &[1, 2]);

        let mut writer = RecordWriter::<u64>::append(&path).unwrap();
        writer.write(&3).unwrap();
        writer.finish().unwrap();

        let mut reader = RecordReader::open(&path, 0, u64::MAX).unwrap();
        assert_eq!(read_all(&mut reader), vec![1, 2, 3]);
    }

    #[test]
    fn test_create_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        write_items(&path, &[1, 2, 3]);
        write_items(&path, &[9]);

        let mut reader = RecordReader::open(&path, 0, u64::MAX).unwrap();
        assert_eq!(read_all(&mut reader), vec![9]);
    }

    #[test]
    fn test_truncated_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.run");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();

        let mut reader = RecordReader::<u64>::open(&path, 0, u64::MAX).unwrap();
        let err = reader.next_item().unwrap_err();
        assert!(matches!(err, SiltError::TruncatedRecord { actual: 3, .. }));
    }
}
