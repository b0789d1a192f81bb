//! Scratch run files.
//!
//! The sorter stages runs in `2 * fanout` scratch files inside a temporary
//! directory. Run `r` of merge level `l` lives in file slot
//! `(l % 2) * fanout + r % fanout`: consecutive levels alternate between the
//! two halves of the table, so levels `l` and `l + 2` share slots but are
//! never live at the same time, and the number of open scratch files stays
//! bounded by the fanout.
//!
//! Within one slot, runs `r`, `r + fanout`, `r + 2*fanout`, ... are appended
//! back to back; a reader seeks to `run_length * fanout^l * (r / fanout)`
//! items to find the start of run `r`.

use std::marker::PhantomData;
use std::path::PathBuf;

use silt_common::{RecordReader, RecordWriter, Record, Result};
use tempfile::TempDir;

/// The table of scratch files behind one merge sort.
pub struct RunFileSet<T: Record> {
    dir: TempDir,
    fanout: usize,
    run_length: usize,
    _marker: PhantomData<T>,
}

impl<T: Record> RunFileSet<T> {
    /// Creates a scratch directory for a sort with the given fanout and
    /// level-0 run length.
    pub fn new(fanout: usize, run_length: usize) -> Result<Self> {
        assert!(fanout >= 2, "fanout must be at least 2");
        let dir = tempfile::tempdir()?;
        tracing::debug!(path = %dir.path().display(), fanout, "created run file directory");
        Ok(Self {
            dir,
            fanout,
            run_length,
            _marker: PhantomData,
        })
    }

    /// Items per run at the given merge level.
    pub fn run_length_at(&self, level: usize) -> u64 {
        let mut length = self.run_length as u64;
        for _ in 0..level {
            length = length.saturating_mul(self.fanout as u64);
        }
        length
    }

    fn slot_index(&self, level: usize, run: usize) -> usize {
        (level % 2) * self.fanout + run % self.fanout
    }

    fn slot_path(&self, index: usize) -> PathBuf {
        self.dir.path().join(format!("run{index:03}.bin"))
    }

    /// Opens run `run` of `level` for writing at the end of its slot. The
    /// first run landing in a slot at a level truncates whatever the
    /// previous same-parity level left there.
    pub fn writer(&self, level: usize, run: usize) -> Result<RecordWriter<T>> {
        let path = self.slot_path(self.slot_index(level, run));
        if run < self.fanout {
            RecordWriter::create(&path)
        } else {
            RecordWriter::append(&path)
        }
    }

    /// Opens run `run` of `level` for reading, positioned at the start of
    /// the run and bounded by the level's run length.
    pub fn reader(&self, level: usize, run: usize) -> Result<RecordReader<T>> {
        let path = self.slot_path(self.slot_index(level, run));
        let run_length = self.run_length_at(level);
        let start = run_length * (run / self.fanout) as u64;
        RecordReader::open(&path, start, run_length)
    }

    /// Returns true if no scratch file has been created yet.
    pub fn no_files_created(&self) -> Result<bool> {
        Ok(std::fs::read_dir(self.dir.path())?.next().is_none())
    }
}
