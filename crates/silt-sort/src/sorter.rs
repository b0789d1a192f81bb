//! External merge sorter.
//!
//! Sorting proceeds in four phases:
//!
//! 1. Parameter calculation ([`SortParameters`]).
//! 2. Run formation: items are pushed into a buffer of `run_length` items;
//!    full buffers are sorted in parallel and appended to level-0 run files.
//! 3. Run merging: while more than `fanout` runs remain, groups of `fanout`
//!    runs are merged into the next level.
//! 4. Final merge: the surviving runs are opened behind one merger that
//!    items are pulled from.
//!
//! If everything received in phase 2 fits under the internal report
//! threshold and no run was flushed, the sorter stays in memory: phase 3 is
//! a no-op and phase 4 walks the sorted buffer directly.

use std::cmp::Ordering;

use rayon::slice::ParallelSliceMut;
use silt_common::{ProgressIndicator, Record, Result, SilentProgress};

use crate::merger::RunMerger;
use crate::params::{SortBudget, SortParameters};
use crate::run_file::RunFileSet;

/// Four-phase external merge sorter.
pub struct MergeSorter<T: Record + Send, F> {
    cmp: F,
    params: Option<SortParameters>,
    run_files: Option<RunFileSet<T>>,
    current_run: Vec<T>,
    finished_runs: usize,
    report_internal: bool,
    items_pulled: usize,
    pull_prepared: bool,
    final_merger: Option<RunMerger<T, F>>,
    progress: Box<dyn ProgressIndicator>,
}

impl<T, F> MergeSorter<T, F>
where
    T: Record + Send,
    F: Fn(&T, &T) -> Ordering + Clone + Sync,
{
    /// Creates a sorter with no parameters set. Call
    /// [`set_available_memory`](MergeSorter::set_available_memory) or
    /// [`set_parameters`](MergeSorter::set_parameters) before
    /// [`begin`](MergeSorter::begin).
    pub fn new(cmp: F) -> Self {
        Self {
            cmp,
            params: None,
            run_files: None,
            current_run: Vec::new(),
            finished_runs: 0,
            report_internal: false,
            items_pulled: 0,
            pull_prepared: false,
            final_merger: None,
            progress: Box::new(SilentProgress),
        }
    }

    /// Creates a sorter with parameters derived from `budget`.
    pub fn with_budget(budget: &SortBudget, cmp: F) -> Self {
        let mut sorter = Self::new(cmp);
        sorter.set_available_memory(budget);
        sorter
    }

    /// Derives parameters from the phase memory budgets.
    pub fn set_available_memory(&mut self, budget: &SortBudget) {
        self.params = Some(SortParameters::calculate(budget, T::ENCODED_SIZE));
    }

    /// Sets run length and fanout directly, bypassing the memory model.
    pub fn set_parameters(&mut self, run_length: usize, fanout: usize) {
        self.params = Some(SortParameters::manual(run_length, fanout));
    }

    /// Installs a progress indicator stepped once per merged run during the
    /// merge phase.
    pub fn set_progress<P: ProgressIndicator + 'static>(&mut self, progress: P) {
        self.progress = Box::new(progress);
    }

    /// Returns the parameters in effect.
    pub fn parameters(&self) -> SortParameters {
        self.params.expect("sort parameters not set")
    }

    fn files(&self) -> &RunFileSet<T> {
        self.run_files.as_ref().expect("begin not called")
    }

    /// Starts phase 2: run formation.
    pub fn begin(&mut self) -> Result<()> {
        let params = self.parameters();
        tracing::debug!("start forming input runs");
        self.run_files = Some(RunFileSet::new(params.fanout, params.run_length)?);
        self.current_run = Vec::with_capacity(params.run_length);
        self.finished_runs = 0;
        Ok(())
    }

    /// Pushes one item during phase 2.
    pub fn push(&mut self, item: T) -> Result<()> {
        let params = self.parameters();
        if self.current_run.len() >= params.run_length {
            self.sort_current_run();
            self.flush_current_run()?;
        }
        self.current_run.push(item);
        Ok(())
    }

    /// Ends phase 2, deciding between internal and external reporting.
    pub fn end(&mut self) -> Result<()> {
        let params = self.parameters();
        self.sort_current_run();
        if self.finished_runs == 0 && self.current_run.len() <= params.internal_report_threshold {
            self.report_internal = true;
            self.items_pulled = 0;
            tracing::debug!(items = self.current_run.len(), "internal reporting mode");
        } else {
            self.report_internal = false;
            self.flush_current_run()?;
            self.current_run = Vec::new();
            tracing::debug!(runs = self.finished_runs, "external reporting mode");
        }
        Ok(())
    }

    /// Runs phase 3 (the merge tree) and prepares phase 4.
    pub fn calc(&mut self) -> Result<()> {
        self.parameters();
        if self.report_internal {
            self.pull_prepared = true;
            return Ok(());
        }
        self.prepare_pull()
    }

    /// Returns true while sorted items remain in phase 4.
    pub fn can_pull(&self) -> bool {
        assert!(self.pull_prepared, "pull not prepared");
        if self.report_internal {
            self.items_pulled < self.current_run.len()
        } else {
            self.final_merger
                .as_ref()
                .map(|m| m.can_pull())
                .unwrap_or(false)
        }
    }

    /// Returns the next sorted item in phase 4.
    pub fn pull(&mut self) -> Result<T> {
        assert!(self.pull_prepared, "pull not prepared");
        if self.report_internal {
            let item = self.current_run[self.items_pulled].clone();
            self.items_pulled += 1;
            if self.items_pulled >= self.current_run.len() {
                self.current_run = Vec::new();
                self.items_pulled = 0;
            }
            Ok(item)
        } else {
            self.final_merger
                .as_mut()
                .expect("pull not prepared")
                .pull()
        }
    }

    fn sort_current_run(&mut self) {
        let cmp = &self.cmp;
        self.current_run.par_sort_unstable_by(|a, b| cmp(a, b));
    }

    // Postcondition: the current run buffer is empty.
    fn flush_current_run(&mut self) -> Result<()> {
        if self.finished_runs < 10 {
            tracing::debug!(
                items = self.current_run.len(),
                run = self.finished_runs,
                "writing run file"
            );
        } else if self.finished_runs == 10 {
            tracing::debug!("...");
        }
        let mut writer = self.files().writer(0, self.finished_runs)?;
        for item in &self.current_run {
            writer.write(item)?;
        }
        writer.finish()?;
        self.current_run.clear();
        self.finished_runs += 1;
        Ok(())
    }

    fn open_merger(
        &self,
        level: usize,
        first_run: usize,
        run_count: usize,
    ) -> Result<RunMerger<T, F>> {
        let files = self.files();
        let mut readers = Vec::with_capacity(run_count);
        for i in 0..run_count {
            readers.push(files.reader(level, first_run + i)?);
        }
        RunMerger::new(readers, self.cmp.clone())
    }

    /// Merges `run_count` runs starting at `first_run` in `level` into a
    /// single run of the next level, returning its run number.
    fn merge_runs(&mut self, level: usize, first_run: usize, run_count: usize) -> Result<usize> {
        let fanout = self.parameters().fanout;
        let mut merger = self.open_merger(level, first_run, run_count)?;
        let next_run = first_run / fanout;
        let mut out = self.files().writer(level + 1, next_run)?;
        while merger.can_pull() {
            out.write(&merger.pull()?)?;
        }
        out.finish()?;
        self.progress.step();
        Ok(next_run)
    }

    /// Counts the merges phase 3 and the final-merge preparation will run.
    fn count_merge_steps(&self) -> u64 {
        let params = self.parameters();
        let mut steps = 0u64;
        let mut run_count = self.finished_runs;
        while run_count > params.fanout {
            let groups = (run_count + params.fanout - 1) / params.fanout;
            steps += groups as u64;
            run_count = groups;
        }
        if run_count > params.final_fanout {
            steps += 1;
        }
        steps
    }

    /// Phase 3: merge level by level until at most `fanout` runs remain,
    /// then open the final merger.
    fn prepare_pull(&mut self) -> Result<()> {
        let fanout = self.parameters().fanout;
        let steps = self.count_merge_steps();
        self.progress.init(steps);
        let mut merge_level = 0;
        let mut run_count = self.finished_runs;
        while run_count > fanout {
            tracing::debug!(run_count, merge_level, "merging runs");
            let mut new_run_count = 0;
            let mut first = 0;
            while first < run_count {
                let group = (run_count - first).min(fanout);
                self.merge_runs(merge_level, first, group)?;
                new_run_count += 1;
                first += fanout;
            }
            merge_level += 1;
            run_count = new_run_count;
        }
        tracing::debug!(run_count, merge_level, "final merge level");
        self.initialize_final_merger(merge_level, run_count)?;
        self.progress.done();
        self.pull_prepared = true;
        Ok(())
    }

    /// Opens the phase-4 merger. When more runs remain than the final fanout
    /// allows, the tail is pre-merged into one large run of the next level
    /// first.
    fn initialize_final_merger(&mut self, level: usize, run_count: usize) -> Result<()> {
        let params = self.parameters();
        if run_count > params.final_fanout {
            tracing::debug!(
                run_count,
                final_fanout = params.final_fanout,
                "pre-merging the tail for the final merge"
            );
            let first = params.final_fanout - 1;
            let merged = self.merge_runs(level, first, run_count - first)?;

            let files = self.files();
            let mut readers = Vec::with_capacity(params.final_fanout);
            for i in 0..params.final_fanout - 1 {
                readers.push(files.reader(level, i)?);
            }
            readers.push(files.reader(level + 1, merged)?);
            self.final_merger = Some(RunMerger::new(readers, self.cmp.clone())?);
        } else {
            self.final_merger = Some(self.open_merger(level, 0, run_count)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sort_items(sorter: &mut MergeSorter<u64, fn(&u64, &u64) -> Ordering>, items: &[u64]) {
        sorter.begin().unwrap();
        for &item in items {
            sorter.push(item).unwrap();
        }
        sorter.end().unwrap();
        sorter.calc().unwrap();
    }

    fn pull_all(sorter: &mut MergeSorter<u64, fn(&u64, &u64) -> Ordering>) -> Vec<u64> {
        let mut items = Vec::new();
        while sorter.can_pull() {
            items.push(sorter.pull().unwrap());
        }
        items
    }

    fn natural() -> MergeSorter<u64, fn(&u64, &u64) -> Ordering> {
        MergeSorter::new(<u64 as Ord>::cmp)
    }

    #[test]
    fn test_internal_report_mode_creates_no_run_file() {
        let mut sorter = natural();
        sorter.set_parameters(8, 2);
        sort_items(&mut sorter, &[3, 1, 2]);

        assert!(sorter.report_internal);
        assert!(sorter.files().no_files_created().unwrap());
        assert_eq!(pull_all(&mut sorter), vec![1, 2, 3]);
    }

    #[test]
    fn test_external_sort_small_runs() {
        let mut sorter = natural();
        sorter.set_parameters(3, 2);
        let input: Vec<u64> = (1..=10).rev().collect();
        sort_items(&mut sorter, &input);

        assert!(!sorter.report_internal);
        assert_eq!(pull_all(&mut sorter), (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn test_internal_mode_boundary() {
        // Exactly at the threshold with no flushed run: internal.
        let mut sorter = natural();
        sorter.set_parameters(4, 2);
        sort_items(&mut sorter, &[4, 3, 2, 1]);
        assert!(sorter.report_internal);
        assert_eq!(pull_all(&mut sorter), vec![1, 2, 3, 4]);

        // One more item overflows the run buffer; a run is flushed, so the
        // sorter must report externally even though the residual is tiny.
        let mut sorter = natural();
        sorter.set_parameters(4, 2);
        sort_items(&mut sorter, &[5, 4, 3, 2, 1]);
        assert!(!sorter.report_internal);
        assert_eq!(pull_all(&mut sorter), (1..=5).collect::<Vec<_>>());
    }

    #[test]
    fn test_multi_level_merge() {
        let mut sorter = natural();
        sorter.set_parameters(2, 2);
        let input: Vec<u64> = (0..32).map(|i| (i * 17 + 5) % 32).collect();
        sort_items(&mut sorter, &input);

        assert_eq!(pull_all(&mut sorter), (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_final_merge_pre_merges_tail() {
        let mut sorter = natural();
        sorter.params = Some(SortParameters {
            run_length: 2,
            fanout: 4,
            final_fanout: 2,
            internal_report_threshold: 2,
            memory_phase2: 0,
            memory_phase3: 0,
            memory_phase4: 0,
        });
        let input: Vec<u64> = (1..=8).rev().collect();
        sort_items(&mut sorter, &input);

        assert_eq!(pull_all(&mut sorter), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_budget_driven_sort_stays_internal_for_small_input() {
        let mut sorter = MergeSorter::with_budget(
            &SortBudget::uniform(4 << 20),
            <u64 as Ord>::cmp as fn(&u64, &u64) -> Ordering,
        );
        sort_items(&mut sorter, &[9, 1, 8, 2]);

        assert!(sorter.report_internal);
        assert_eq!(pull_all(&mut sorter), vec![1, 2, 8, 9]);
    }

    #[test]
    fn test_randomized_external_sort() {
        use rand::seq::SliceRandom;

        let mut input: Vec<u64> = (0..500).collect();
        input.shuffle(&mut rand::thread_rng());

        let mut sorter = natural();
        sorter.set_parameters(7, 3);
        sort_items(&mut sorter, &input);

        assert_eq!(pull_all(&mut sorter), (0..500).collect::<Vec<_>>());
    }

    #[test]
    fn test_equal_items_all_survive() {
        let mut sorter: MergeSorter<(u64, u64), _> =
            MergeSorter::new(|a: &(u64, u64), b: &(u64, u64)| a.0.cmp(&b.0));
        sorter.set_parameters(3, 2);
        sorter.begin().unwrap();
        for i in 0..12u64 {
            sorter.push((i % 3, i)).unwrap();
        }
        sorter.end().unwrap();
        sorter.calc().unwrap();

        let mut out = Vec::new();
        while sorter.can_pull() {
            out.push(sorter.pull().unwrap());
        }

        let keys: Vec<u64> = out.iter().map(|&(k, _)| k).collect();
        let mut sorted_keys = keys.clone();
        sorted_keys.sort_unstable();
        assert_eq!(keys, sorted_keys);

        let mut payloads: Vec<u64> = out.iter().map(|&(_, v)| v).collect();
        payloads.sort_unstable();
        assert_eq!(payloads, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_input() {
        let mut sorter = natural();
        sorter.set_parameters(4, 2);
        sort_items(&mut sorter, &[]);

        assert!(sorter.report_internal);
        assert!(pull_all(&mut sorter).is_empty());
    }

    #[test]
    fn test_progress_steps_once_per_merge() {
        use silt_common::ProgressIndicator;
        use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
        use std::sync::Arc;

        struct CountSteps(Arc<AtomicU64>);

        impl ProgressIndicator for CountSteps {
            fn init(&mut self, _steps: u64) {}

            fn step(&mut self) {
                self.0.fetch_add(1, AtomicOrdering::Relaxed);
            }

            fn done(&mut self) {}
        }

        let steps = Arc::new(AtomicU64::new(0));
        let mut sorter = natural();
        sorter.set_parameters(2, 2);
        sorter.set_progress(CountSteps(Arc::clone(&steps)));
        let input: Vec<u64> = (0..16).rev().collect();
        sort_items(&mut sorter, &input);

        // Eight runs merge as 8 -> 4 -> 2: six merge steps in total.
        assert_eq!(steps.load(AtomicOrdering::Relaxed), 6);
        assert_eq!(pull_all(&mut sorter), (0..16).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "sort parameters not set")]
    fn test_begin_without_parameters_panics() {
        let mut sorter = natural();
        let _ = sorter.begin();
    }

    #[test]
    #[should_panic(expected = "pull not prepared")]
    fn test_pull_before_calc_panics() {
        let mut sorter = natural();
        sorter.set_parameters(4, 2);
        sorter.begin().unwrap();
        sorter.end().unwrap();
        sorter.can_pull();
    }
}
